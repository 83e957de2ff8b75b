use std::collections::BTreeMap;

use pretty_assertions::assert_eq;

use super::*;

fn roundtrip(value: Value) -> Value {
    let encoded = serde_json::to_string(&value).unwrap();
    serde_json::from_str(&encoded).unwrap()
}

#[test]
fn scalars_roundtrip() {
    assert_eq!(roundtrip(Value::Bool(true)), Value::Bool(true));
    assert_eq!(roundtrip(Value::Int(-3)), Value::Int(-3));
    assert_eq!(roundtrip(Value::Double(1.5)), Value::Double(1.5));
    assert_eq!(
        roundtrip(Value::Str("song".into())),
        Value::Str("song".into())
    );
}

#[test]
fn bytes_survive_non_utf8() {
    let raw = vec![0x2f, 0x6d, 0xff, 0xfe, 0x00, 0x01];
    let encoded = serde_json::to_string(&Value::Bytes(raw.clone())).unwrap();
    assert!(encoded.contains("b64"));
    assert_eq!(roundtrip(Value::Bytes(raw.clone())), Value::Bytes(raw));
}

#[test]
fn structs_and_arrays_nest() {
    let mut fields = BTreeMap::new();
    fields.insert("start".to_owned(), Value::Int(0));
    fields.insert(
        "list".to_owned(),
        Value::Array(vec![Value::Bytes(b"/m/a.mp3".to_vec())]),
    );
    let value = Value::Struct(fields);
    assert_eq!(roundtrip(value.clone()), value);
}

#[test]
fn b64_wrapper_with_extra_fields_is_rejected() {
    let result: Result<Value, _> = serde_json::from_str(r#"{"b64": "YQ==", "x": 1}"#);
    assert!(result.is_err());
}

#[test]
fn bad_base64_is_rejected() {
    let result: Result<Value, _> = serde_json::from_str(r#"{"b64": "not base64!"}"#);
    assert!(result.is_err());
}

#[test]
fn request_defaults_missing_params() {
    let request: Request = serde_json::from_str(r#"{"method": "no_op"}"#).unwrap();
    assert_eq!(request.method, "no_op");
    assert!(request.params.is_empty());
}

#[test]
fn request_parses_mixed_params() {
    let request: Request =
        serde_json::from_str(r#"{"method": "insert", "params": [[{"b64": "YQ=="}], -1]}"#).unwrap();
    assert_eq!(
        request.params,
        vec![
            Value::Array(vec![Value::Bytes(b"a".to_vec())]),
            Value::Int(-1)
        ]
    );
}

#[test]
fn responses_use_single_key_envelopes() {
    let ok = Response::Result(Value::Bool(true)).into_line();
    assert_eq!(ok, r#"{"result":true}"#);
    let fault = Response::Fault(Fault::no_such_method("bogus")).into_line();
    assert_eq!(
        fault,
        r#"{"fault":{"faultCode":-506,"faultString":"Method 'bogus' not found"}}"#
    );
}

#[test]
fn fault_struct_matches_wire_names() {
    let fault = Fault::invalid_argument("Overlapping ranges may not be swapped");
    let Value::Struct(fields) = fault.to_struct() else {
        panic!("expected struct");
    };
    assert_eq!(fields["faultCode"], Value::Int(APPLICATION_ERROR));
}

#[test]
fn type_tokens_render_lowercase() {
    assert_eq!(TypeToken::Boolean.to_string(), "boolean");
    assert_eq!(TypeToken::Base64.to_string(), "base64");
    assert_eq!(TypeToken::Int.to_string(), "int");
}
