use super::ToolDescriptor;
use crate::core::model::ToolSpec;

/// Translate advertised tool descriptors into the Messages API tool shape.
/// Schemas are passed through untouched; a malformed schema surfaces at the
/// model invocation that uses it, not here.
pub fn build_tool_specs(descriptors: &[ToolDescriptor]) -> Vec<ToolSpec> {
    descriptors
        .iter()
        .map(|d| ToolSpec {
            name: d.name.clone(),
            description: d.description.clone().unwrap_or_default(),
            input_schema: d.input_schema.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn preserves_names_and_order() {
        let descriptors = vec![
            ToolDescriptor {
                name: "pull_chart".to_string(),
                description: Some("Fetch the patient chart".to_string()),
                input_schema: json!({"type": "object", "properties": {"case_id": {"type": "string"}}}),
            },
            ToolDescriptor {
                name: "propose_determination".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            },
        ];

        let specs = build_tool_specs(&descriptors);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "pull_chart");
        assert_eq!(specs[0].description, "Fetch the patient chart");
        assert_eq!(specs[1].name, "propose_determination");
        assert_eq!(specs[1].description, "");
    }

    #[test]
    fn passes_malformed_schema_through() {
        let descriptors = vec![ToolDescriptor {
            name: "odd".to_string(),
            description: None,
            input_schema: json!("not-an-object"),
        }];

        let specs = build_tool_specs(&descriptors);
        assert_eq!(specs[0].input_schema, json!("not-an-object"));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(build_tool_specs(&[]).is_empty());
    }
}
