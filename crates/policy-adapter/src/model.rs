use casbin::prelude::DefaultModel;

// Matches the record layout: one `p` ptype with subject/object/action and one
// two-field `g` ptype.
const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

pub fn rbac_model_string() -> &'static str {
    MODEL
}

pub async fn rbac_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RuleCategory, classify};
    use casbin::Model;

    fn declared_fields(section: &str, ptype: &str) -> Vec<String> {
        let mut in_section = false;
        for line in rbac_model_string().lines().map(str::trim) {
            if line.starts_with('[') {
                in_section = line == format!("[{section}]");
                continue;
            }
            if in_section
                && let Some((name, fields)) = line.split_once('=')
                && name.trim() == ptype
            {
                return fields
                    .split(',')
                    .map(|field| field.trim().to_string())
                    .collect();
            }
        }
        Vec::new()
    }

    #[test]
    fn declared_arities_classify_into_their_own_sections() {
        let authorization = declared_fields("policy_definition", "p");
        let grouping = declared_fields("role_definition", "g");
        assert_eq!(authorization, ["sub", "obj", "act"]);
        assert_eq!(grouping, ["_", "_"]);
        assert_eq!(classify(&authorization), Some(RuleCategory::Authorization));
        assert_eq!(classify(&grouping), Some(RuleCategory::Grouping));
    }

    #[tokio::test]
    async fn parsed_model_accepts_two_field_groupings() {
        let mut model = rbac_model().await.expect("model");
        assert!(model.add_policy("g", "g", vec!["alice".to_string(), "admin".to_string()]));
        assert!(model.add_policy(
            "p",
            "p",
            vec!["admin".to_string(), "data1".to_string(), "read".to_string()]
        ));
        assert_eq!(model.get_policy("g", "g").len(), 1);
        assert_eq!(model.get_policy("p", "p").len(), 1);
        assert!(model.get_model().get("g").is_some_and(|section| section.len() == 1));
    }
}
