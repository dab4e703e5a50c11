//! APISIX v2 <-> v3 object translation.
//!
//! https://apisix.apache.org/docs/apisix/upgrade-guide-from-2.15.x-to-3.0.0/
//! Operates on one resource object (route, service, ...) at a time and is
//! idempotent when source and target versions match.

use serde_json::{Map, Value};

pub const V2: &str = "v2";
pub const V3: &str = "v3";

/// Resource URIs that are read-only in migrate/restore.
pub const IGNORE_URIS: &[&str] = &["plugins/list"];

/// `ssl <-> ssls`, `proto <-> protos` — the v2 endpoint name maps to the v3
/// one and back; every other URI is shared between versions.
pub fn alias_uri(uri: &str) -> &str {
    match uri {
        "ssl" => "ssls",
        "ssls" => "ssl",
        "proto" => "protos",
        "protos" => "proto",
        other => other,
    }
}

/// Translate one resource object from `from_version` to `to_version`.
/// A no-op when the versions match.
pub fn translate(from_version: &str, to_version: &str, mut data: Value) -> Value {
    if from_version == to_version {
        return data;
    }

    let Some(obj) = data.as_object_mut() else {
        return data;
    };

    match (from_version, to_version) {
        (V2, V3) => translate_v2_to_v3(obj),
        (V3, V2) => translate_v3_to_v2(obj),
        _ => {}
    }

    data
}

fn translate_v2_to_v3(obj: &mut Map<String, Value>) {
    if let Some(Value::Object(plugins)) = obj.get_mut("plugins") {
        for plugin in plugins.values_mut() {
            if let Some(plugin) = plugin.as_object_mut() {
                let enable = plugin.remove("enable").and_then(|v| v.as_bool()).unwrap_or(true);
                let mut meta = Map::new();
                meta.insert("disable".to_string(), Value::Bool(!enable));
                plugin.insert("_meta".to_string(), Value::Object(meta));
            }
        }
    }

    if obj.contains_key("upstream") {
        if let Some(service_protocol) = obj.remove("service_protocol") {
            if let Some(Value::Object(upstream)) = obj.get_mut("upstream") {
                upstream.insert("scheme".to_string(), service_protocol);
            }
        }
    }
}

fn translate_v3_to_v2(obj: &mut Map<String, Value>) {
    if let Some(Value::Object(plugins)) = obj.get_mut("plugins") {
        for plugin in plugins.values_mut() {
            if let Some(plugin) = plugin.as_object_mut() {
                let disable = plugin
                    .remove("_meta")
                    .and_then(|m| m.as_object().and_then(|m| m.get("disable").cloned()))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                plugin.insert("enable".to_string(), Value::Bool(!disable));
            }
        }
    }

    let scheme = obj
        .get("upstream")
        .and_then(|u| u.get("scheme"))
        .and_then(Value::as_str)
        .map(str::to_string);

    // Only grpc is promoted back to the top-level field; other schemes stay
    // solely in upstream.scheme.
    if let Some(scheme) = scheme {
        if scheme == "grpc" {
            obj.insert("service_protocol".to_string(), Value::String(scheme));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_when_versions_match() {
        let data = json!({"plugins": {"limit-req": {"enable": false}}});
        assert_eq!(translate(V2, V2, data.clone()), data);
    }

    #[test]
    fn v2_to_v3_moves_enable_into_meta_disable() {
        let data = json!({"plugins": {"limit-req": {"enable": false, "rate": 10}}});
        let out = translate(V2, V3, data);
        assert_eq!(
            out,
            json!({"plugins": {"limit-req": {"rate": 10, "_meta": {"disable": true}}}})
        );
    }

    #[test]
    fn v2_to_v3_moves_service_protocol_into_upstream_scheme() {
        let data = json!({"service_protocol": "grpc", "upstream": {"nodes": []}});
        let out = translate(V2, V3, data);
        assert_eq!(out, json!({"upstream": {"nodes": [], "scheme": "grpc"}}));
    }

    #[test]
    fn v3_to_v2_restores_enable_from_meta_disable() {
        let data = json!({"plugins": {"limit-req": {"rate": 10, "_meta": {"disable": true}}}});
        let out = translate(V3, V2, data);
        assert_eq!(out, json!({"plugins": {"limit-req": {"rate": 10, "enable": false}}}));
    }

    #[test]
    fn v3_to_v2_promotes_only_grpc_scheme() {
        let grpc = json!({"upstream": {"scheme": "grpc"}});
        assert_eq!(
            translate(V3, V2, grpc),
            json!({"upstream": {"scheme": "grpc"}, "service_protocol": "grpc"})
        );

        let https = json!({"upstream": {"scheme": "https"}});
        assert_eq!(translate(V3, V2, https.clone()), https);
    }

    #[test]
    fn alias_uri_maps_ssl_and_proto_pairs() {
        assert_eq!(alias_uri("ssl"), "ssls");
        assert_eq!(alias_uri("ssls"), "ssl");
        assert_eq!(alias_uri("proto"), "protos");
        assert_eq!(alias_uri("protos"), "proto");
        assert_eq!(alias_uri("routes"), "routes");
    }
}
