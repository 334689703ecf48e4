//! Domain records and queued mutations
//!
//! Every collection the engine knows about has a typed record, a typed patch
//! for partial updates, and a place in the [`Mutation`] union. Replaying a
//! queued write never inspects untyped JSON: the variant says which endpoint
//! to call and the payload is already the right shape.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SharedError;

/// A named category of domain record, analogous to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Events,
    Users,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Events, Collection::Users];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Events => "events",
            Collection::Users => "users",
        }
    }

    /// How long a cached record stays valid before the maintenance pass may
    /// evict it
    pub fn cache_ttl(&self) -> Duration {
        match self {
            Collection::Events => Duration::days(30),
            Collection::Users => Duration::days(60),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Collection::Events),
            "users" => Ok(Collection::Users),
            other => Err(SharedError::unknown_collection(other)),
        }
    }
}

/// Kind of write carried by a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(SharedError::validation(
                "operation",
                format!("unknown operation '{other}'"),
            )),
        }
    }
}

/// Local filter applied to cached records before they are emitted
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub category: Option<String>,
    pub upcoming_only: bool,
    pub now: Option<DateTime<Utc>>,
}

/// A typed record stored in one collection
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    /// Whether a cached record passes the caller's filter. Collections
    /// without filterable fields accept everything.
    fn matches(&self, _filter: &RecordFilter) -> bool {
        true
    }
}

/// An event listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            category: None,
            starts_at: None,
            venue: None,
            image_url: None,
            updated_at: None,
        }
    }
}

impl Record for EventRecord {
    const COLLECTION: Collection = Collection::Events;

    fn id(&self) -> &str {
        &self.id
    }

    fn matches(&self, filter: &RecordFilter) -> bool {
        if let Some(wanted) = &filter.category {
            match &self.category {
                Some(category) if category.eq_ignore_ascii_case(wanted) => {}
                _ => return false,
            }
        }
        if filter.upcoming_only {
            let now = filter.now.unwrap_or_else(Utc::now);
            return self.starts_at.is_some_and(|start| start >= now);
        }
        true
    }
}

/// Partial update of an event; absent fields are left untouched remotely
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Record for UserRecord {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Target of a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
}

/// A write against one collection, keyed by operation × collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Mutation {
    CreateEvent(EventRecord),
    UpdateEvent(EventPatch),
    DeleteEvent(RecordRef),
    CreateUser(UserRecord),
    UpdateUser(UserPatch),
    DeleteUser(RecordRef),
}

impl Mutation {
    /// Build a typed mutation from the loosely shaped `(operation, table, data)`
    /// triple a caller hands to the coordinator.
    ///
    /// Creates without an `id` get a freshly generated one so the record can
    /// be cached before the remote has seen it. Updates and deletes must name
    /// their target.
    pub fn from_parts(operation: OperationKind, table: &str, mut data: Value) -> Result<Self, SharedError> {
        let collection: Collection = table.parse()?;

        let has_id = data
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());

        match operation {
            OperationKind::Create if !has_id => {
                let Some(object) = data.as_object_mut() else {
                    return Err(SharedError::validation("data", "create payload must be an object"));
                };
                object.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            }
            OperationKind::Update | OperationKind::Delete if !has_id => {
                return Err(SharedError::validation(
                    "id",
                    format!("{operation} payload must carry the target record id"),
                ));
            }
            _ => {}
        }

        let mutation = match (operation, collection) {
            (OperationKind::Create, Collection::Events) => Mutation::CreateEvent(serde_json::from_value(data)?),
            (OperationKind::Update, Collection::Events) => Mutation::UpdateEvent(serde_json::from_value(data)?),
            (OperationKind::Delete, Collection::Events) => Mutation::DeleteEvent(serde_json::from_value(data)?),
            (OperationKind::Create, Collection::Users) => Mutation::CreateUser(serde_json::from_value(data)?),
            (OperationKind::Update, Collection::Users) => Mutation::UpdateUser(serde_json::from_value(data)?),
            (OperationKind::Delete, Collection::Users) => Mutation::DeleteUser(serde_json::from_value(data)?),
        };
        Ok(mutation)
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            Mutation::CreateEvent(_) | Mutation::CreateUser(_) => OperationKind::Create,
            Mutation::UpdateEvent(_) | Mutation::UpdateUser(_) => OperationKind::Update,
            Mutation::DeleteEvent(_) | Mutation::DeleteUser(_) => OperationKind::Delete,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Mutation::CreateEvent(_) | Mutation::UpdateEvent(_) | Mutation::DeleteEvent(_) => Collection::Events,
            Mutation::CreateUser(_) | Mutation::UpdateUser(_) | Mutation::DeleteUser(_) => Collection::Users,
        }
    }

    /// Id of the record this mutation targets
    pub fn record_id(&self) -> &str {
        match self {
            Mutation::CreateEvent(record) => &record.id,
            Mutation::UpdateEvent(patch) => &patch.id,
            Mutation::DeleteEvent(target) | Mutation::DeleteUser(target) => &target.id,
            Mutation::CreateUser(record) => &record.id,
            Mutation::UpdateUser(patch) => &patch.id,
        }
    }

    /// The write payload as sent to the remote API
    pub fn payload(&self) -> Result<Value, SharedError> {
        let value = match self {
            Mutation::CreateEvent(record) => serde_json::to_value(record)?,
            Mutation::UpdateEvent(patch) => serde_json::to_value(patch)?,
            Mutation::DeleteEvent(target) | Mutation::DeleteUser(target) => serde_json::to_value(target)?,
            Mutation::CreateUser(record) => serde_json::to_value(record)?,
            Mutation::UpdateUser(patch) => serde_json::to_value(patch)?,
        };
        Ok(value)
    }
}
