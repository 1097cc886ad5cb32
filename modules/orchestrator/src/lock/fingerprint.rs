use ring::digest::{Context, SHA256};
use serde_json::{Map, Value};

/// Derive the lock key of a task invocation.
///
/// The key is the prefix, followed by the hex encoded SHA-256 digest over the task name and the
/// canonical JSON form of the arguments. Object keys are sorted, so that the order in which
/// arguments were provided doesn't matter.
pub fn fingerprint(prefix: &str, task_name: &str, args: &Value, kwargs: &Value) -> String {
    let mut context = Context::new(&SHA256);
    context.update(task_name.as_bytes());
    context.update(canonical_json(args).as_bytes());
    context.update(canonical_json(kwargs).as_bytes());

    format!("{prefix}{}", hex::encode(context.finish()))
}

/// Serialize a value with object keys sorted, recursively.
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect::<Map<_, _>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        value => value.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"nvr": "fio-3.1-2.el7", "license_scan": true, "copyright_scan": true});
        let b = json!({"copyright_scan": true, "nvr": "fio-3.1-2.el7", "license_scan": true});
        let kwargs_a = json!({"queue": "openlcs.low", "priority": 9});
        let kwargs_b = json!({"priority": 9, "queue": "openlcs.low"});

        assert_eq!(
            fingerprint("p:", "import", &json!([a]), &kwargs_a),
            fingerprint("p:", "import", &json!([b]), &kwargs_b)
        );
    }

    #[test]
    fn nested_objects_are_sorted() {
        assert_eq!(
            canonical_json(&json!({"b": {"y": 1, "x": [{"d": 1, "c": 2}]}, "a": null})),
            r#"{"a":null,"b":{"x":[{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn inputs_change_the_key() {
        let args = json!([{"nvr": "fio-3.1-2.el7"}]);
        let kwargs = json!({});
        let key = fingerprint("p:", "import", &args, &kwargs);

        assert!(key.starts_with("p:"));
        assert_eq!(key.len(), 2 + 64);
        assert_ne!(key, fingerprint("p:", "fork", &args, &kwargs));
        assert_ne!(
            key,
            fingerprint("p:", "import", &json!([{"nvr": "fio-3.1-3.el7"}]), &kwargs)
        );
        // array order is significant
        assert_ne!(
            fingerprint("p:", "import", &json!([1, 2]), &kwargs),
            fingerprint("p:", "import", &json!([2, 1]), &kwargs)
        );
    }
}
