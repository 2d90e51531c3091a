//! Generated workspace files as `hcl::Body` values, formatted by hcl-rs.
//!
//! Attribute and block names must be valid HCL identifiers; anything else is
//! a render error rather than a quoted key. Object keys inside expressions
//! are written bare when they are identifiers and quoted otherwise.

use hcl::expr::{Traversal, Variable};
use hcl::format::{Format, Formatter};
use hcl::{Attribute, Block, Body, Expression, Identifier, Structure};
use serde_json::Value;

use crate::error::{IacError, IacResult};

fn render_error(err: hcl::Error) -> IacError {
    IacError::Render(err.to_string())
}

/// A validated identifier for an attribute, block or variable name.
pub fn identifier(name: &str) -> IacResult<Identifier> {
    Identifier::new(name)
        .map_err(|_| IacError::Render(format!("'{}' is not a valid HCL identifier", name)))
}

/// `key = value`.
pub fn attribute(key: &str, value: impl Into<Expression>) -> IacResult<Attribute> {
    Ok(Attribute::new(identifier(key)?, value))
}

/// HCL literal of a JSON value. Strings are escaped, so `${` never
/// interpolates.
pub fn literal(value: &Value) -> IacResult<Expression> {
    hcl::to_expression(value).map_err(render_error)
}

/// `root.attr1.attr2...`, or the bare variable when `attrs` is empty.
pub fn traversal(root: &str, attrs: &[&str]) -> IacResult<Expression> {
    let variable = Variable::new(root)
        .map_err(|_| IacError::Render(format!("'{}' is not a valid HCL identifier", root)))?;
    if attrs.is_empty() {
        return Ok(variable.into());
    }

    let mut builder = Traversal::builder(variable);
    for attr in attrs {
        builder = builder.attr(identifier(attr)?);
    }
    Ok(builder.build().into())
}

/// Nested configuration of a provider. An object gives one block of
/// attributes, a list of objects repeats the block, anything else is a plain
/// attribute.
pub fn config_structures(name: &str, value: &Value) -> IacResult<Vec<Structure>> {
    match value {
        Value::Object(fields) => {
            let mut block = Block::builder(identifier(name)?);
            for (key, item) in fields {
                block = block.add_attribute(attribute(key, literal(item)?)?);
            }
            Ok(vec![block.build().into()])
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let mut structures = Vec::with_capacity(items.len());
            for item in items {
                structures.extend(config_structures(name, item)?);
            }
            Ok(structures)
        }
        other => Ok(vec![attribute(name, literal(other)?)?.into()]),
    }
}

/// Format a body. Scalar lists stay on one line.
pub fn to_hcl(body: &Body) -> IacResult<String> {
    let mut formatter = Formatter::builder()
        .compact_arrays(true)
        .prefer_ident_keys(true)
        .build_vec();
    body.format_string(&mut formatter).map_err(render_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(structures: Vec<Structure>) -> String {
        to_hcl(&Body::builder().add_structures(structures).build()).unwrap()
    }

    #[test]
    fn test_strings_never_interpolate() {
        let body = Body::builder()
            .add_attribute(attribute("plain", literal(&json!("plain")).unwrap()).unwrap())
            .add_attribute(attribute("quoted", literal(&json!("say \"hi\"\n")).unwrap()).unwrap())
            .add_attribute(attribute("template", literal(&json!("${var.x} and %{if}")).unwrap()).unwrap())
            .add_attribute(attribute("cost", literal(&json!("cost: $5")).unwrap()).unwrap())
            .build();

        assert_eq!(
            to_hcl(&body).unwrap(),
            concat!(
                "plain = \"plain\"\n",
                "quoted = \"say \\\"hi\\\"\\n\"\n",
                "template = \"$${var.x} and %%{if}\"\n",
                "cost = \"cost: $5\"\n",
            )
        );
    }

    #[test]
    fn test_literals() {
        let body = Body::builder()
            .add_attribute(attribute("count", literal(&json!(3)).unwrap()).unwrap())
            .add_attribute(attribute("enabled", literal(&json!(true)).unwrap()).unwrap())
            .add_attribute(attribute("zones", literal(&json!(["a", "b"])).unwrap()).unwrap())
            .add_attribute(
                attribute("tags", literal(&json!({"Name": "main", "team name": "platform"})).unwrap()).unwrap(),
            )
            .build();

        assert_eq!(
            to_hcl(&body).unwrap(),
            concat!(
                "count = 3\n",
                "enabled = true\n",
                "zones = [\"a\", \"b\"]\n",
                "tags = {\n",
                "  Name = \"main\"\n",
                "  \"team name\" = \"platform\"\n",
                "}\n",
            )
        );
    }

    #[test]
    fn test_non_identifier_names_are_rejected() {
        assert!(matches!(attribute("team name", true), Err(IacError::Render(_))));
        assert!(matches!(identifier("9lives"), Err(IacError::Render(_))));
        assert!(matches!(
            config_structures("default tags", &json!({"a": 1})),
            Err(IacError::Render(_))
        ));
        assert!(identifier("instance-count").is_ok());
    }

    #[test]
    fn test_traversals() {
        let body = Body::builder()
            .add_attribute(attribute("aws", traversal("aws", &[]).unwrap()).unwrap())
            .add_attribute(attribute("value", traversal("module", &["dns", "zone_id"]).unwrap()).unwrap())
            .build();
        assert_eq!(to_hcl(&body).unwrap(), "aws = aws\nvalue = module.dns.zone_id\n");
        assert!(traversal("module", &["has space"]).is_err());
    }

    #[test]
    fn test_config_blocks() {
        let mut structures = vec![attribute("region", "us-west-2").unwrap().into()];
        structures.extend(config_structures("default_tags", &json!({"tags": {"Owner": "platform"}})).unwrap());
        structures.extend(config_structures("ignore_tags", &json!([{"keys": ["a"]}, {"keys": ["b"]}])).unwrap());
        structures.extend(config_structures("max_retries", &json!(5)).unwrap());
        let provider = Block::builder("provider")
            .add_label("aws")
            .add_structures(structures)
            .build();

        assert_eq!(
            render(vec![provider.into()]),
            concat!(
                "provider \"aws\" {\n",
                "  region = \"us-west-2\"\n",
                "\n",
                "  default_tags {\n",
                "    tags = {\n",
                "      Owner = \"platform\"\n",
                "    }\n",
                "  }\n",
                "\n",
                "  ignore_tags {\n",
                "    keys = [\"a\"]\n",
                "  }\n",
                "\n",
                "  ignore_tags {\n",
                "    keys = [\"b\"]\n",
                "  }\n",
                "\n",
                "  max_retries = 5\n",
                "}\n",
            )
        );
    }
}
