mod schedule;

pub use schedule::*;

use crate::Error;
use serde_json::{json, Value};
use std::str::FromStr;

/// Logical priority of a submitted task.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
    serde::Serialize,
    serde::Deserialize,
    clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    High,
    Medium,
    Low,
}

/// The broker parameters of a priority.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueParams {
    /// a dedicated queue, `None` for the default one
    pub queue: Option<String>,
    /// a numeric priority, larger values are less important
    pub priority: Option<i32>,
}

impl QueueParams {
    /// The name of the queue, falling back to the default queue.
    pub fn queue_name<'a>(&'a self, base: &'a str) -> &'a str {
        self.queue.as_deref().unwrap_or(base)
    }

    /// Render as keyword arguments of a submission.
    pub fn to_kwargs(&self) -> Value {
        let mut kwargs = json!({});
        if let Some(queue) = &self.queue {
            kwargs["queue"] = json!(queue);
        }
        if let Some(priority) = self.priority {
            kwargs["priority"] = json!(priority);
        }
        kwargs
    }

    /// Read back the keyword arguments of a submission.
    pub fn from_kwargs(kwargs: &Value) -> Self {
        Self {
            queue: kwargs["queue"].as_str().map(String::from),
            priority: kwargs["priority"]
                .as_i64()
                .and_then(|priority| i32::try_from(priority).ok()),
        }
    }
}

/// Map a priority to its broker parameters.
pub fn route_priority(base: &str, priority: Priority) -> QueueParams {
    match priority {
        Priority::High => QueueParams::default(),
        Priority::Medium => QueueParams {
            queue: Some(format!("{base}.medium")),
            priority: Some(5),
        },
        Priority::Low => QueueParams {
            queue: Some(format!("{base}.low")),
            priority: Some(9),
        },
    }
}

/// Map the name of a priority to its broker parameters.
///
/// Unknown names are rejected with [`Error::Configuration`].
pub fn route(base: &str, priority: &str) -> Result<QueueParams, Error> {
    let priority = Priority::from_str(priority)
        .map_err(|_| Error::Configuration(format!("unknown priority: '{priority}'")))?;
    Ok(route_priority(base, priority))
}

/// The queues served by a worker, together with their weights, most important first.
pub fn queues(base: &str, weights: &[u32]) -> Result<Vec<(String, u32)>, Error> {
    use strum::VariantArray;

    if weights.len() != Priority::VARIANTS.len() {
        return Err(Error::Configuration(format!(
            "expected {} queue weights, got {}",
            Priority::VARIANTS.len(),
            weights.len()
        )));
    }

    Ok(Priority::VARIANTS
        .iter()
        .zip(weights)
        .map(|(priority, weight)| {
            (
                route_priority(base, *priority).queue_name(base).to_string(),
                *weight,
            )
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("high", None, None)]
    #[case("medium", Some("openlcs.medium"), Some(5))]
    #[case("low", Some("openlcs.low"), Some(9))]
    fn routing(#[case] priority: &str, #[case] queue: Option<&str>, #[case] level: Option<i32>) {
        let params = route("openlcs", priority).expect("must be known");
        assert_eq!(params.queue.as_deref(), queue);
        assert_eq!(params.priority, level);
    }

    #[test]
    fn high_has_no_kwargs() {
        assert_eq!(
            route("openlcs", "high").map(|p| p.to_kwargs()).ok(),
            Some(json!({}))
        );
        assert_eq!(
            route("openlcs", "low").map(|p| p.to_kwargs()).ok(),
            Some(json!({"queue": "openlcs.low", "priority": 9}))
        );
    }

    #[test]
    fn kwargs_of_forked_tasks() {
        let params = route_priority("openlcs", Priority::Medium);
        assert_eq!(QueueParams::from_kwargs(&params.to_kwargs()), params);
        assert_eq!(QueueParams::from_kwargs(&json!({})), QueueParams::default());
    }

    #[rstest]
    #[case("urgent")]
    #[case("")]
    #[case("HIGH ")]
    fn unknown_priority(#[case] priority: &str) {
        assert!(matches!(
            route("openlcs", priority),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn queue_names() {
        assert_eq!(
            queues("openlcs", &[6, 3, 1]).ok(),
            Some(vec![
                ("openlcs".to_string(), 6),
                ("openlcs.medium".to_string(), 3),
                ("openlcs.low".to_string(), 1),
            ])
        );
        assert!(queues("openlcs", &[1]).is_err());
    }
}
