//! Models shared by the unit tests of this crate.

use ormgraph_core::{
    EntityHooks, EntityState, Hook, MemoryStorage, Related, RelatedMany, Schema,
};
use ormgraph_macros::Entity;

use crate::{Database, DatabaseConfig};

#[derive(Entity, Debug, Default)]
pub struct User {
    pub id: i64,
    #[entity(required, max_length = 20)]
    pub name: String,
    #[entity(unique)]
    pub email: Option<String>,
    #[entity(created_at)]
    pub created: i64,
    #[entity(updated_at)]
    pub updated: i64,
    pub cars: RelatedMany<Car>,
    pub profile: Related<Profile>,
    pub state: EntityState,
}

#[derive(Entity, Debug, Default)]
#[entity(hooks)]
pub struct Car {
    pub id: i64,
    pub model: String,
    pub locked: bool,
    pub user: Related<User>,
    pub tags: RelatedMany<Tag>,
    #[entity(skip)]
    pub saves: u32,
    pub state: EntityState,
}

impl EntityHooks for Car {
    fn before_save(&mut self) -> Hook {
        if self.locked { Hook::Stop } else { Hook::Continue }
    }

    fn after_save(&mut self) {
        self.saves += 1;
    }

    fn before_delete(&mut self) -> Hook {
        if self.locked { Hook::Stop } else { Hook::Continue }
    }
}

#[derive(Entity, Debug, Default)]
pub struct Tag {
    pub id: i64,
    pub label: String,
    pub cars: RelatedMany<Car>,
    pub state: EntityState,
}

#[derive(Entity, Debug, Default)]
pub struct Profile {
    pub id: i64,
    pub bio: String,
    pub user: Related<User>,
    pub state: EntityState,
}

pub fn schema() -> Schema {
    Schema::builder()
        .model::<User>()
        .model::<Car>()
        .model::<Tag>()
        .model::<Profile>()
        .build()
        .unwrap()
}

pub fn database() -> Database<MemoryStorage> {
    Database::with_config(
        MemoryStorage::new().with_unique("users", "email"),
        schema(),
        DatabaseConfig::default().clock(|| 1_000),
    )
}

pub fn user(name: &str) -> User {
    User {
        name: name.to_string(),
        ..User::default()
    }
}

pub fn car(model: &str) -> Car {
    Car {
        model: model.to_string(),
        ..Car::default()
    }
}

pub fn tag(label: &str) -> Tag {
    Tag {
        label: label.to_string(),
        ..Tag::default()
    }
}
