//! Task envelope: the immutable record describing one unit of deferred work.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::util::clock::now_ms;

/// Logical name of the operation a backend should run for an envelope.
///
/// The queue never interprets it; sinks use it as the label for every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskTarget(String);

impl TaskTarget {
    /// Create a target from a task name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Task name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskTarget {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TaskTarget {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// One unit of deferred work.
///
/// Built with the `with_*` methods before it is handed to the dispatcher.
/// Once enqueued it is moved into the queue and then to the consumer; nothing
/// mutates it after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    id: Uuid,
    target: TaskTarget,
    #[serde(with = "duration_secs")]
    countdown: Duration,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    created_at_ms: u128,
}

impl TaskEnvelope {
    /// New envelope for `target` with no delay and no arguments.
    pub fn new(target: impl Into<TaskTarget>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            countdown: Duration::ZERO,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            created_at_ms: now_ms(),
        }
    }

    /// Delay the backend should honor before executing the task.
    #[must_use]
    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = countdown;
        self
    }

    /// Replace the positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Append one positional argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replace the keyword arguments.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: BTreeMap<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Insert one keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Unique envelope id, for log correlation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Operation to invoke.
    #[must_use]
    pub const fn target(&self) -> &TaskTarget {
        &self.target
    }

    /// Task name (shorthand for `target().as_str()`).
    #[must_use]
    pub fn task_name(&self) -> &str {
        self.target.as_str()
    }

    /// Requested execution delay.
    #[must_use]
    pub const fn countdown(&self) -> Duration {
        self.countdown
    }

    /// Positional arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword arguments.
    #[must_use]
    pub const fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    /// Creation timestamp in milliseconds since epoch.
    #[must_use]
    pub const fn created_at_ms(&self) -> u128 {
        self.created_at_ms
    }
}

/// Countdown travels as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
