//! `SeaORM` entities

pub mod cluster_lock;

pub mod prelude {
    pub use super::cluster_lock::Entity as ClusterLock;
}
