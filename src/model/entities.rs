//! Property-management entities and their storage layout.

use crate::registry::{Entity, Field, JoinSpec, QueryShape};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub subdomain: String,
    pub name: String,
    pub status: i64,
    pub site_code: String,
    pub date_registered: String,
    pub attr: Value,
}

impl Entity for Site {
    fn table_name() -> &'static str {
        "site"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("subdomain"),
            Field::text("name"),
            Field::int("status"),
            Field::text("site_code"),
            Field::timestamp("date_registered"),
            Field::json("attr"),
        ];
        FIELDS
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub site_id: String,
    pub status: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
    pub attr: Value,
    pub support_account: bool,
    pub role: i64,
    #[serde(rename = "type")]
    pub user_type: i64,
    pub is_site_user: bool,
}

impl Entity for User {
    fn table_name() -> &'static str {
        "users"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("site_id"),
            Field::int("status"),
            Field::text("first_name"),
            Field::text("last_name"),
            Field::text("email"),
            Field::text("password"),
            Field::text("phone"),
            Field::json("attr"),
            Field::boolean("support_account"),
            Field::int("role"),
            Field::int("type"),
            Field::boolean("is_site_user"),
        ];
        FIELDS
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Street {
    pub id: String,
    pub site_id: String,
    pub name: String,
}

impl Entity for Street {
    fn table_name() -> &'static str {
        "street"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[Field::text("id"), Field::text("site_id"), Field::text("name")];
        FIELDS
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub site_id: String,
    #[serde(rename = "type")]
    pub unit_type: i64,
    pub street_id: String,
    pub label: String,
    pub attr: Value,
}

impl Entity for Unit {
    fn table_name() -> &'static str {
        "unit"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("site_id"),
            Field::int("type"),
            Field::text("street_id"),
            Field::text("label"),
            Field::json("attr"),
        ];
        FIELDS
    }
}

/// A person living in a unit. Site, unit and activity come from the residency.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Resident {
    pub id: String,
    pub can_login: bool,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub phone: String,
    pub attr: Value,
    #[serde(rename = "type")]
    pub resident_type: i64,
    pub status: i64,
    pub primary_id: String,
    pub residency_id: String,
    pub unit_id: String,
    pub site_id: String,
    pub active_status: i64,
}

impl Entity for Resident {
    fn table_name() -> &'static str {
        "resident"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::boolean("can_login"),
            Field::text("first_name"),
            Field::text("last_name"),
            Field::text("email"),
            Field::text("password"),
            Field::text("phone"),
            Field::json("attr"),
            Field::int("type"),
            Field::int("status"),
            Field::text("primary_id"),
            Field::text("residency_id"),
            Field::text("unit_id").computed(),
            Field::text("site_id").computed(),
            Field::int("active_status").computed(),
        ];
        FIELDS
    }

    fn query_shape() -> QueryShape {
        QueryShape {
            joins: vec![JoinSpec {
                table: "residency",
                alias: "rs",
                local_key: "residency_id",
                foreign_key: "id",
                columns: &["site_id", "unit_id", "active_status"],
            }],
            drop_filter_keys: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Residency {
    pub id: String,
    pub site_id: String,
    pub unit_id: String,
    pub previous_unit_id: String,
    pub active_status: i64,
    pub date_start: String,
    pub date_exit: String,
}

impl Entity for Residency {
    fn table_name() -> &'static str {
        "residency"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("site_id"),
            Field::text("unit_id"),
            Field::text("previous_unit_id"),
            Field::int("active_status"),
            Field::timestamp("date_start"),
            Field::timestamp("date_exit"),
        ];
        FIELDS
    }
}

/// A recurring charge levied on residents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Due {
    pub id: String,
    pub site_id: String,
    pub date_created: String,
    pub name: String,
    pub description: String,
    /// Exact decimal, kept as text.
    pub amount: String,
    pub status: i64,
    pub attr: Value,
}

impl Default for Due {
    fn default() -> Self {
        Due {
            id: String::new(),
            site_id: String::new(),
            date_created: String::new(),
            name: String::new(),
            description: String::new(),
            amount: "0".to_string(),
            status: 0,
            attr: Value::Null,
        }
    }
}

impl Entity for Due {
    fn table_name() -> &'static str {
        "due"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("site_id"),
            Field::timestamp("date_created"),
            Field::text("name"),
            Field::text("description"),
            Field::decimal("amount"),
            Field::int("status"),
            Field::json("attr"),
        ];
        FIELDS
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatePass {
    pub id: String,
    pub site_id: String,
    pub resident_id: String,
    pub date_created: String,
    pub token: String,
    pub plate_number: String,
    #[serde(rename = "type")]
    pub pass_type: i64,
    pub status: i64,
    pub attr: Value,
}

impl Entity for GatePass {
    fn table_name() -> &'static str {
        "gate_pass"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("site_id"),
            Field::text("resident_id"),
            Field::timestamp("date_created"),
            Field::text("token"),
            Field::text("plate_number"),
            Field::int("type"),
            Field::int("status"),
            Field::json("attr"),
        ];
        FIELDS
    }
}

/// Queued background job; see [`crate::worker`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub site_id: String,
    pub date_created: String,
    /// Handler key.
    pub name: String,
    pub data: Value,
    /// 0 pending, 1 done, negative after failures.
    pub status: i64,
}

impl Entity for Task {
    fn table_name() -> &'static str {
        "task_queue"
    }

    fn fields() -> &'static [Field] {
        const FIELDS: &[Field] = &[
            Field::text("id"),
            Field::text("site_id"),
            Field::timestamp("date_created"),
            Field::text("name"),
            Field::json("data"),
            Field::int("status"),
        ];
        FIELDS
    }
}
