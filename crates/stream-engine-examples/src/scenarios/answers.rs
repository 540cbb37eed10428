use serde_json::{Value, json};
use stream_engine_core::{FieldKind, FieldSpec, InputValues};

/// Parses a `name=value` flag. JSON values are taken as-is, anything else as text.
pub fn parse_answer(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty field name in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Builds a submission for `fields`: explicit answers first, then declared
/// defaults, then a plausible sample for required fields.
pub fn answers_for(fields: &[FieldSpec], answers: &[(String, Value)]) -> InputValues {
    fields
        .iter()
        .filter_map(|field| {
            let explicit = answers
                .iter()
                .rev()
                .find(|(name, _)| *name == field.name)
                .map(|(_, value)| value.clone());
            explicit
                .or_else(|| field.default.clone())
                .or_else(|| field.required.then(|| sample(&field.kind)))
                .map(|value| (field.name.clone(), value))
        })
        .collect()
}

fn sample(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::Text => json!("demo"),
        FieldKind::Number => json!(1),
        FieldKind::Email => json!("demo@example.com"),
        FieldKind::Url => json!("https://example.com"),
        FieldKind::Date => json!("2026-01-01"),
        FieldKind::Choice { options } => options.first().map(|o| json!(o)).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use stream_engine_core::validate_input;

    use super::*;

    #[test]
    fn parses_json_and_plain_values() {
        assert_eq!(parse_answer("seats=12").unwrap(), ("seats".into(), json!(12)));
        assert_eq!(parse_answer("name=Ada").unwrap(), ("name".into(), json!("Ada")));
        assert!(parse_answer("novalue").is_err());
        assert!(parse_answer("=x").is_err());
    }

    #[test]
    fn autofilled_answers_pass_validation() {
        let fields = vec![
            FieldSpec::required("name", FieldKind::Text),
            FieldSpec::required("email", FieldKind::Email),
            FieldSpec::optional("seats", FieldKind::Number).with_default(json!(5)),
            FieldSpec::optional("site", FieldKind::Url),
        ];
        let answers = vec![("name".to_string(), json!("Ada"))];
        let values = answers_for(&fields, &answers);
        assert_eq!(values.get("name"), Some(&json!("Ada")));
        assert_eq!(values.get("seats"), Some(&json!(5)));
        assert!(!values.contains_key("site"));
        assert!(validate_input(&fields, &values).is_ok());
    }
}
