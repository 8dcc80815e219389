//! `SeaORM` Entity for cluster_lock table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "cluster_lock")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_name = "lockKey")]
    pub lock_key: String,
    pub status: String,
    #[sea_orm(column_name = "lockOwner")]
    pub lock_owner: Option<String>,
    #[sea_orm(column_name = "lockThread")]
    pub lock_thread: Option<String>,
    #[sea_orm(column_name = "lockTime")]
    pub lock_time: i64,
    #[sea_orm(column_name = "expirationTime")]
    pub expiration_time: i64,
    #[sea_orm(column_name = "lastModified")]
    pub last_modified: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
