//! Hand-written entities for unit tests.

use std::sync::OnceLock;

use crate::Result;
use crate::error::Error;
use crate::field::PropertyDescriptor;
use crate::handle::Link;
use crate::model::{Entity, EntityHooks, ModelDescriptor};
use crate::related::{Related, RelatedMany, RelationSlot};
use crate::row::FromValue;
use crate::state::EntityState;
use crate::types::SqlType;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct Node {
    pub id: i64,
    pub label: String,
    pub parent: Related<Node>,
    pub children: RelatedMany<Node>,
    pub state: EntityState,
}

impl EntityHooks for Node {}

impl Entity for Node {
    const MODEL_NAME: &'static str = "Node";

    fn descriptor() -> &'static ModelDescriptor {
        static DESCRIPTOR: OnceLock<ModelDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            ModelDescriptor::new("Node", "id")
                .property(PropertyDescriptor::scalar("id", SqlType::BigInt).nullable(false))
                .property(
                    PropertyDescriptor::scalar("label", SqlType::Text)
                        .required(true)
                        .max_length(8)
                        .pattern("^[a-z]+$"),
                )
                .property(PropertyDescriptor::entity("parent", "Node").inverse("children"))
                .property(PropertyDescriptor::entity_list("children", "Node"))
        })
    }

    fn blank() -> Self {
        Self::default()
    }

    fn state(&self) -> &EntityState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column(&self, property: &str) -> Option<Value> {
        match property {
            "id" => Some(Value::from(self.id)),
            "label" => Some(Value::from(self.label.clone())),
            _ => None,
        }
    }

    fn set_column(&mut self, property: &str, value: &Value) -> Result<()> {
        match property {
            "id" => self.id = i64::from_value(value)?,
            "label" => self.label = String::from_value(value)?,
            _ => return Err(Error::unknown_property(Self::MODEL_NAME, property)),
        }
        Ok(())
    }

    fn link(&self, property: &str) -> Option<Link> {
        match property {
            "parent" => Some(self.parent.to_link()),
            "children" => Some(self.children.to_link()),
            _ => None,
        }
    }

    fn set_link(&mut self, property: &str, link: Link) -> Result<()> {
        match property {
            "parent" => self.parent.assign(Self::MODEL_NAME, property, link),
            "children" => self.children.assign(Self::MODEL_NAME, property, link),
            _ => Err(Error::unknown_property(Self::MODEL_NAME, property)),
        }
    }
}

pub fn node(id: i64, label: &str) -> Node {
    Node {
        id,
        label: label.to_string(),
        ..Node::default()
    }
}
