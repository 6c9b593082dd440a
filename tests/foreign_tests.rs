mod common;

use common::{engine_with, gateway_schema, routing_engine, static_route_schema, temp_config_dir};
use config_model::{
    ChangeNote, Engine, FieldSpec, ModelDefinition, ModelInit, ModelRegistry, Schema,
    field::foreign::ForeignModelType, submit_model,
};
use serde_json::json;
use serde_value::Value;

fn create(engine: &Engine, model: &str, data: serde_json::Value) -> config_model::Result<config_model::Model> {
    let mut record = engine.instantiate(model, ModelInit::data(data))?;
    record.create(engine, false)?;
    Ok(record)
}

#[test]
fn test_reference_resolves_by_name() {
    let dir = temp_config_dir();
    let engine = routing_engine(&dir);
    create(&engine, "RoutingGateway", json!({ "name": "gw1" })).unwrap();

    let route = create(
        &engine,
        "StaticRoute",
        json!({ "network": "10.0.0.0/24", "gateway": "gw1" }),
    )
    .unwrap();
    assert_eq!(route.id(), Some(0));
    assert_eq!(
        engine.store().get_opt("staticroutes/route/0/gateway"),
        Some(Value::String("gw1".into()))
    );

    let reloaded = engine.get("StaticRoute", Some(0)).unwrap();
    assert_eq!(reloaded.get("gateway"), Some(&json!("gw1")));
}

#[test]
fn test_unresolved_reference_is_not_found() {
    let dir = temp_config_dir();
    let engine = routing_engine(&dir);

    let err = create(
        &engine,
        "StaticRoute",
        json!({ "network": "10.0.0.0/24", "gateway": "missing" }),
    )
    .unwrap_err();
    assert_eq!(err.response_id(), "FOREIGN_MODEL_FIELD_VALUE_NOT_FOUND");
    assert_eq!(err.code(), 404);
}

#[test]
fn test_dangling_stored_reference_reads_back_raw() {
    let dir = temp_config_dir();
    let engine = routing_engine(&dir);
    let note = ChangeNote::new("Hand edit");
    engine
        .store()
        .set(
            "staticroutes/route/0/network",
            Value::String("10.1.0.0/16".into()),
            &note,
        )
        .unwrap();
    engine
        .store()
        .set(
            "staticroutes/route/0/gateway",
            Value::String("ghost".into()),
            &note,
        )
        .unwrap();

    let route = engine.get("StaticRoute", Some(0)).unwrap();
    assert_eq!(route.get("gateway"), Some(&json!("ghost")));
}

#[test]
fn test_referenced_record_cannot_be_deleted() {
    let dir = temp_config_dir();
    let engine = routing_engine(&dir);
    create(&engine, "RoutingGateway", json!({ "name": "gw1" })).unwrap();
    create(
        &engine,
        "StaticRoute",
        json!({ "network": "10.0.0.0/24", "gateway": "gw1" }),
    )
    .unwrap();

    let mut gateway = engine.get("RoutingGateway", Some(0)).unwrap();
    let err = gateway.delete(&engine, false).unwrap_err();
    assert_eq!(err.response_id(), "MODEL_CANNOT_BE_DELETED_IN_USE");
    assert_eq!(err.code(), 409);
    assert_eq!(
        err.to_payload().data,
        json!({ "references": [{ "model": "StaticRoute", "id": 0, "field": "gateway" }] })
    );
    assert!(engine.get("RoutingGateway", Some(0)).is_ok());

    let err = engine
        .delete_many(
            "RoutingGateway",
            &[("name", json!("gw1"))],
            config_model::Client::system(),
            false,
        )
        .unwrap_err();
    assert_eq!(err.response_id(), "MODEL_CANNOT_BE_DELETED_IN_USE");

    engine
        .get("StaticRoute", Some(0))
        .unwrap()
        .delete(&engine, false)
        .unwrap();
    gateway.delete(&engine, false).unwrap();
    assert_eq!(engine.read_all("RoutingGateway").unwrap().count(), 0);
}

#[test]
fn test_replace_all_keeps_referenced_records() {
    let dir = temp_config_dir();
    let engine = routing_engine(&dir);
    create(&engine, "RoutingGateway", json!({ "name": "gw1" })).unwrap();
    create(
        &engine,
        "StaticRoute",
        json!({ "network": "10.0.0.0/24", "gateway": "gw1" }),
    )
    .unwrap();

    let err = engine
        .replace_all(
            "RoutingGateway",
            &[json!({ "name": "gw2" })],
            config_model::Client::system(),
            false,
        )
        .unwrap_err();
    assert_eq!(err.response_id(), "MODEL_CANNOT_BE_DELETED_IN_USE");

    engine
        .replace_all(
            "RoutingGateway",
            &[json!({ "name": "gw2" }), json!({ "name": "gw1", "descr": "kept" })],
            config_model::Client::system(),
            false,
        )
        .unwrap();
    let route = engine.get("StaticRoute", Some(0)).unwrap();
    assert_eq!(route.get("gateway"), Some(&json!("gw1")));
}

fn tunnel_schema(target: ForeignModelType) -> Schema {
    Schema::builder("Tunnel")
        .config_path("tunnels/tunnel")
        .many()
        .field("descr", FieldSpec::string().required(true))
        .field("gateway", FieldSpec::typed(target).required(true))
        .build()
        .unwrap()
}

#[test]
fn test_reference_stored_by_id() {
    let dir = temp_config_dir();
    let engine = engine_with(
        &dir,
        vec![
            gateway_schema(),
            static_route_schema(),
            tunnel_schema(
                ForeignModelType::new("RoutingGateway", "name")
                    .internal("id")
                    .keyword("default"),
            ),
        ],
    );
    create(&engine, "RoutingGateway", json!({ "name": "gw0" })).unwrap();
    create(&engine, "RoutingGateway", json!({ "name": "gw1" })).unwrap();

    create(&engine, "Tunnel", json!({ "descr": "t0", "gateway": "gw1" })).unwrap();
    assert_eq!(
        engine.store().get_opt("tunnels/tunnel/0/gateway"),
        Some(Value::String("1".into()))
    );
    let tunnel = engine.get("Tunnel", Some(0)).unwrap();
    assert_eq!(tunnel.get("gateway"), Some(&json!("gw1")));

    create(&engine, "Tunnel", json!({ "descr": "t1", "gateway": "default" })).unwrap();
    assert_eq!(
        engine.store().get_opt("tunnels/tunnel/1/gateway"),
        Some(Value::String("default".into()))
    );
}

#[test]
fn test_registry_rejects_invalid_targets() {
    let non_unique = ModelRegistry::builder()
        .register_schema(gateway_schema())
        .register_schema(static_route_schema())
        .register_schema(tunnel_schema(ForeignModelType::new("RoutingGateway", "descr")))
        .build()
        .unwrap_err();
    assert_eq!(
        non_unique.response_id(),
        "FOREIGN_MODEL_FIELD_REFERENCES_NON_UNIQUE_FIELD"
    );

    let unknown = ModelRegistry::builder()
        .register_schema(tunnel_schema(ForeignModelType::new("Nowhere", "name")))
        .build()
        .unwrap_err();
    assert_eq!(unknown.response_id(), "FOREIGN_MODEL_FIELD_WITH_UNKNOWN_MODEL");

    let missing_referrer = ModelRegistry::builder()
        .register_schema(gateway_schema())
        .build()
        .unwrap_err();
    assert_eq!(missing_referrer.response_id(), "FIELD_REFERENCED_BY_UNKNOWN_FIELD");
}

struct VirtualIp;

impl ModelDefinition for VirtualIp {
    const NAME: &'static str = "VirtualIp";

    fn schema() -> config_model::Result<Schema> {
        Schema::builder(Self::NAME)
            .verbose_name("Virtual IP")
            .config_path("virtualip/vip")
            .many()
            .field("subnet", FieldSpec::string().required(true).unique(true))
            .field(
                "carp_parent",
                FieldSpec::foreign(Self::NAME, "subnet").allow_null(true),
            )
            .build()
    }
}

submit_model!(VirtualIp);

#[test]
fn test_submitted_models_are_collected() {
    let registry = ModelRegistry::builder()
        .collect_submitted()
        .build()
        .unwrap();
    assert!(registry.contains("VirtualIp"));
    assert_eq!(
        registry.schema("VirtualIp").map(|s| s.verbose_name()),
        Some("Virtual IP")
    );

    let direct = ModelRegistry::builder()
        .register::<VirtualIp>()
        .build()
        .unwrap();
    assert_eq!(direct.names().collect::<Vec<_>>(), vec!["VirtualIp"]);
}
