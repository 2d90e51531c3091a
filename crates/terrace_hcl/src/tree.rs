//! Conversion of an `hcl-rs` body into the JSON tree shape.

use hcl::expr::{Expression, ObjectKey, TemplateExpr};
use hcl::{Block, Body, Structure};
use serde_json::{Map, Value};

use crate::error::{HclError, HclResult};

/// Convert a parsed body into a JSON object.
///
/// Blocks are keyed by type, then by each label in turn; the innermost key
/// always holds a list so repeated blocks accumulate.
pub fn body_to_tree(body: Body) -> HclResult<Value> {
    let mut map = Map::new();
    for structure in body.into_iter() {
        match structure {
            Structure::Attribute(attribute) => {
                let key = attribute.key.to_string();
                if map.contains_key(&key) {
                    return Err(HclError::InvalidResponse(format!(
                        "'{}' is defined more than once",
                        key
                    )));
                }
                map.insert(key, expression_to_value(attribute.expr)?);
            }
            Structure::Block(block) => insert_block(&mut map, block)?,
        }
    }
    Ok(Value::Object(map))
}

fn insert_block(map: &mut Map<String, Value>, block: Block) -> HclResult<()> {
    let mut path: Vec<String> = block
        .labels
        .iter()
        .map(|label| label.as_str().to_string())
        .collect();
    path.insert(0, block.identifier.to_string());

    let body = body_to_tree(block.body)?;
    let leaf = path.pop().unwrap_or_default();

    let mut current = map;
    for key in path {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(inner) => inner,
            _ => return Err(conflict(&key)),
        };
    }

    match current
        .entry(leaf.clone())
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        Value::Array(bodies) => {
            bodies.push(body);
            Ok(())
        }
        _ => Err(conflict(&leaf)),
    }
}

fn conflict(key: &str) -> HclError {
    HclError::InvalidResponse(format!("'{}' is used both as a block and an attribute", key))
}

fn expression_to_value(expr: Expression) -> HclResult<Value> {
    let value = match expr {
        Expression::Null => Value::Null,
        Expression::Bool(flag) => Value::Bool(flag),
        Expression::Number(number) => serde_json::to_value(&number)?,
        Expression::String(text) => Value::String(text),
        Expression::Array(items) => Value::Array(
            items
                .into_iter()
                .map(expression_to_value)
                .collect::<HclResult<Vec<_>>>()?,
        ),
        Expression::Object(object) => {
            let mut map = Map::new();
            for (key, value) in object {
                map.insert(object_key(key)?, expression_to_value(value)?);
            }
            Value::Object(map)
        }
        Expression::TemplateExpr(template) => match *template {
            TemplateExpr::QuotedString(text) => Value::String(text),
            TemplateExpr::Heredoc(heredoc) => Value::String(heredoc.template),
        },
        other => Value::String(interpolation(&other)?),
    };
    Ok(value)
}

fn object_key(key: ObjectKey) -> HclResult<String> {
    match key {
        ObjectKey::Identifier(ident) => Ok(ident.to_string()),
        ObjectKey::Expression(expr) => match expression_to_value(expr)? {
            Value::String(text) => Ok(text),
            other => Ok(other.to_string()),
        },
        #[allow(unreachable_patterns)]
        _ => Err(HclError::InvalidResponse("unsupported object key".to_string())),
    }
}

/// Source form of a non-literal expression wrapped as `${...}`.
fn interpolation(expr: &Expression) -> HclResult<String> {
    Ok(format!("${{{}}}", hcl::format::to_string(expr)?))
}

/// Bodies of every block of `kind` at the top of `tree`, following labels.
///
/// For `variable "region" {}` and kind `variable` this yields
/// `("region", body)`; unlabeled blocks yield an empty label.
pub fn labeled_blocks<'a>(tree: &'a Value, kind: &str) -> Vec<(String, &'a Value)> {
    let mut found = Vec::new();
    match tree.get(kind) {
        Some(Value::Array(bodies)) => {
            found.extend(bodies.iter().map(|body| (String::new(), body)));
        }
        Some(Value::Object(labels)) => {
            for (label, nested) in labels {
                if let Value::Array(bodies) = nested {
                    found.extend(bodies.iter().map(|body| (label.clone(), body)));
                }
            }
        }
        _ => {}
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(source: &str) -> Value {
        body_to_tree(hcl::parse(source).unwrap()).unwrap()
    }

    #[test]
    fn test_unlabeled_blocks_become_lists() {
        let tree = parse(
            r#"
terraform {
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }
  }
}
"#,
        );
        assert_eq!(
            tree,
            json!({
                "terraform": [{
                    "required_providers": [{
                        "aws": {"source": "hashicorp/aws", "version": "~> 5.0"}
                    }]
                }]
            })
        );
    }

    #[test]
    fn test_labels_nest_objects() {
        let tree = parse(
            r#"
resource "aws_vpc" "main" {
  cidr_block = "10.0.0.0/16"
}
resource "aws_vpc" "backup" {
  cidr_block = "10.1.0.0/16"
}
"#,
        );
        assert_eq!(
            tree,
            json!({
                "resource": {
                    "aws_vpc": {
                        "main": [{"cidr_block": "10.0.0.0/16"}],
                        "backup": [{"cidr_block": "10.1.0.0/16"}]
                    }
                }
            })
        );
    }

    #[test]
    fn test_repeated_blocks_accumulate() {
        let tree = parse("ingress {\n  port = 80\n}\ningress {\n  port = 443\n}\n");
        assert_eq!(tree, json!({"ingress": [{"port": 80}, {"port": 443}]}));
    }

    #[test]
    fn test_scalars_and_collections() {
        let tree = parse(
            r#"
enabled = true
count   = 3
ratio   = 0.5
nothing = null
zones   = ["a", "b"]
tags    = { Name = "main", "team-name" = "platform" }
"#,
        );
        assert_eq!(
            tree,
            json!({
                "enabled": true,
                "count": 3,
                "ratio": 0.5,
                "nothing": null,
                "zones": ["a", "b"],
                "tags": {"Name": "main", "team-name": "platform"}
            })
        );
    }

    #[test]
    fn test_expressions_are_interpolated() {
        let tree = parse("variable \"id\" {\n  type = string\n}\noutput \"id\" {\n  value = aws_vpc.main.id\n}\n");
        assert_eq!(
            tree,
            json!({
                "variable": {"id": [{"type": "${string}"}]},
                "output": {"id": [{"value": "${aws_vpc.main.id}"}]}
            })
        );
    }

    #[test]
    fn test_labeled_blocks_lookup() {
        let tree = parse("variable \"a\" {}\nvariable \"b\" {}\nterraform {}\n");
        let names: Vec<String> = labeled_blocks(&tree, "variable")
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));

        let terraform = labeled_blocks(&tree, "terraform");
        assert_eq!(terraform.len(), 1);
        assert_eq!(terraform[0].0, "");
    }
}
