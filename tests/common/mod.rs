#![allow(dead_code)]

use std::sync::Once;

use lms_admin_client::Config;
use serde_json::{Value, json};
use wiremock::ResponseTemplate;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn config(server_uri: &str) -> Config {
    Config::from_values(server_uri, None, Some(10), None)
}

pub fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "message": "ok",
        "data": data,
    }))
}

pub fn failed(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": false,
        "message": message,
    }))
}
