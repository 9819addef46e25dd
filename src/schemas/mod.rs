pub mod graph;

use graph::Project;
use schemars::schema_for;

/// JSON schema of the document the editor sends in.
pub fn input_schema() -> schemars::Schema {
    schema_for!(Project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_describes_both_graphs() {
        let schema = serde_json::to_value(input_schema()).unwrap();
        let text = schema.to_string();
        assert!(text.contains("architecture"));
        assert!(text.contains("operatorId"));
    }
}
