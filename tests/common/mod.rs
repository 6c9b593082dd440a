#![allow(dead_code)]

use std::sync::Arc;

use config_model::{ConfigStore, Engine, FieldSpec, ModelRegistry, Schema, StoreOptions};
use tempfile::TempDir;

/// Helper to create a temporary directory for tests
pub fn temp_config_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn store_options(dir: &TempDir) -> StoreOptions {
    StoreOptions::builder()
        .path(dir.path().join("config.toml"))
        .lock_attempts(3)
        .lock_interval_ms(10)
        .build()
        .expect("valid store options")
}

pub fn open_store(dir: &TempDir) -> Arc<ConfigStore> {
    Arc::new(ConfigStore::open(store_options(dir)).expect("Failed to open store"))
}

pub fn engine_with(dir: &TempDir, schemas: Vec<Schema>) -> Engine {
    let registry = schemas
        .into_iter()
        .fold(ModelRegistry::builder(), |builder, schema| {
            builder.register_schema(schema)
        })
        .build()
        .expect("valid registry");
    Engine::new(open_store(dir), Arc::new(registry))
}

pub fn gateway_schema() -> Schema {
    Schema::builder("RoutingGateway")
        .verbose_name("Routing Gateway")
        .config_path("gateways/gateway_item")
        .many()
        .subsystem("routing")
        .field(
            "name",
            FieldSpec::string()
                .required(true)
                .unique(true)
                .referenced_by("StaticRoute", "gateway"),
        )
        .field(
            "interface",
            FieldSpec::string()
                .default_value("wan")
                .choices(["wan", "lan", "opt1"]),
        )
        .field("gateway", FieldSpec::string().default_value("dynamic"))
        .field("descr", FieldSpec::string().default_value(""))
        .build()
        .expect("valid gateway schema")
}

pub fn static_route_schema() -> Schema {
    Schema::builder("StaticRoute")
        .config_path("staticroutes/route")
        .many()
        .subsystem("routing")
        .field("network", FieldSpec::string().required(true).unique(true))
        .field(
            "gateway",
            FieldSpec::foreign("RoutingGateway", "name").required(true),
        )
        .field("disabled", FieldSpec::boolean(""))
        .field("descr", FieldSpec::string().default_value(""))
        .build()
        .expect("valid static route schema")
}

pub fn routing_engine(dir: &TempDir) -> Engine {
    engine_with(dir, vec![gateway_schema(), static_route_schema()])
}
