//! CLI integration tests for openapi-preprocess binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("openapi-preprocess"))
}

// Helper to create a temp document or payload file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

const PETSTORE: &str = r##"{
    "openapi": "3.0.3",
    "info": { "title": "Pets", "version": "1" },
    "paths": {
        "/pets": {
            "post": {
                "requestBody": {
                    "required": true,
                    "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                },
                "responses": {
                    "201": {
                        "description": "created",
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                    }
                }
            }
        },
        "/pets/{id}": {
            "parameters": [
                { "name": "id", "in": "path", "required": true, "schema": { "type": "string", "pattern": "^[0-9]+$" } }
            ],
            "get": {
                "responses": {
                    "200": {
                        "description": "ok",
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                    }
                }
            }
        }
    },
    "components": {
        "schemas": {
            "Pet": {
                "type": "object",
                "required": ["id", "name"],
                "properties": {
                    "id": { "type": "string", "readOnly": true },
                    "name": { "type": "string" },
                    "owner": { "type": "string", "format": "custom-id" }
                }
            }
        }
    }
}"##;

mod preprocess_command {
    use super::*;

    #[test]
    fn basic_preprocess() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);

        cmd()
            .args(["preprocess", doc.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""required":["name"]"#));
    }

    #[test]
    fn preprocess_response_view() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);

        cmd()
            .args([
                "preprocess",
                doc.to_str().unwrap(),
                "--direction",
                "response",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""required":["id","name"]"#));
    }

    #[test]
    fn preprocess_with_serdes_format() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);

        cmd()
            .args(["preprocess", doc.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""type":["object","string"]"#).not());

        cmd()
            .args([
                "preprocess",
                doc.to_str().unwrap(),
                "--serdes-format",
                "custom-id",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""type":["object","string"]"#));
    }

    #[test]
    fn preprocess_with_pretty() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);

        cmd()
            .args(["preprocess", doc.to_str().unwrap(), "--pretty"])
            .assert()
            .success()
            // Pretty output has newlines and indentation
            .stdout(predicate::str::contains("{\n"));
    }

    #[test]
    fn preprocess_with_output_file() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let output = dir.path().join("output.json");

        cmd()
            .args([
                "preprocess",
                doc.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let content = fs::read_to_string(&output).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["components"]["schemas"]["Pet"]["required"], serde_json::json!(["name"]));
    }

    #[test]
    fn preprocess_yaml_document() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(
            &dir,
            "openapi.yaml",
            r#"
openapi: 3.0.3
paths: {}
components:
  schemas:
    Token:
      type: object
      required: [token]
      properties:
        token:
          type: string
          readOnly: true
"#,
        );

        cmd()
            .args(["preprocess", doc.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""Token":{"type":"object","properties""#));
    }

    #[test]
    fn skipped_response_is_reported() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(
            &dir,
            "openapi.json",
            r##"{
                "openapi": "3.0.3",
                "paths": {
                    "/pets": { "get": { "responses": { "404": { "$ref": "#/components/responses/Missing" } } } }
                }
            }"##,
        );

        cmd()
            .args(["preprocess", doc.to_str().unwrap()])
            .assert()
            .success()
            .stderr(predicate::str::contains(
                "skipped unresolvable response #/paths/~1pets/get/responses/404",
            ));
    }

    #[test]
    fn missing_document() {
        cmd()
            .args(["preprocess", "/nonexistent/openapi.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn malformed_reference_fails() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(
            &dir,
            "openapi.json",
            r#"{
                "openapi": "3.0.3",
                "paths": {
                    "/pets": {
                        "post": {
                            "requestBody": { "content": { "application/json": { "schema": { "$ref": "Pet" } } } }
                        }
                    }
                }
            }"#,
        );

        cmd()
            .args(["preprocess", doc.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("malformed reference"));
    }

    #[test]
    fn missing_openapi_version() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", r#"{"paths": {}}"#);

        cmd()
            .args(["preprocess", doc.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("missing version"));
    }
}

mod validate_command {
    use super::*;

    #[test]
    fn valid_request_body() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{"name": "Rex"}"#);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                payload.to_str().unwrap(),
                "--route",
                "/pets",
                "--method",
                "post",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid"));
    }

    #[test]
    fn invalid_request_body() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{"name": 42}"#);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                payload.to_str().unwrap(),
                "--route",
                "/pets",
                "--method",
                "post",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Validation failed (400)"))
            .stderr(predicate::str::contains("/body/name"));
    }

    #[test]
    fn serdes_value_accepted_with_format() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{"name": "Rex", "owner": {"id": "u-1"}}"#);
        let args = |extra: &[&str]| {
            let mut args = vec![
                "validate".to_string(),
                doc.to_str().unwrap().to_string(),
                payload.to_str().unwrap().to_string(),
                "--route".to_string(),
                "/pets".to_string(),
                "--method".to_string(),
                "post".to_string(),
            ];
            args.extend(extra.iter().map(|s| s.to_string()));
            args
        };

        cmd().args(args(&[])).assert().code(1);
        cmd()
            .args(args(&["--serdes-format", "custom-id"]))
            .assert()
            .success();
    }

    #[test]
    fn response_requires_read_only_property() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let partial = write_temp_file(&dir, "partial.json", r#"{"name": "Rex"}"#);
        let full = write_temp_file(&dir, "full.json", r#"{"id": "1", "name": "Rex"}"#);

        for (payload, ok) in [(&partial, false), (&full, true)] {
            let assert = cmd()
                .args([
                    "validate",
                    doc.to_str().unwrap(),
                    payload.to_str().unwrap(),
                    "--route",
                    "/pets",
                    "--method",
                    "post",
                    "--status",
                    "201",
                ])
                .assert();
            if ok {
                assert.success();
            } else {
                assert
                    .code(1)
                    .stderr(predicate::str::contains("Validation failed (500)"));
            }
        }
    }

    #[test]
    fn path_parameters_checked() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "empty.json", "{}");
        let run = |id: &str| {
            cmd()
                .args([
                    "validate",
                    doc.to_str().unwrap(),
                    payload.to_str().unwrap(),
                    "--route",
                    "/pets/{id}",
                    "--method",
                    "get",
                    "--path-param",
                    &format!("id={id}"),
                ])
                .assert()
        };

        run("42").success();
        run("abc")
            .code(1)
            .stderr(predicate::str::contains("/path/id"));
    }

    #[test]
    fn json_output_format() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{}"#);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                payload.to_str().unwrap(),
                "--route",
                "/pets",
                "--method",
                "post",
                "--json",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""valid":false"#))
            .stdout(predicate::str::contains(r#""status":400"#));
    }

    #[test]
    fn unknown_route_is_404() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{}"#);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                payload.to_str().unwrap(),
                "--route",
                "/owners",
                "--method",
                "get",
                "--json",
            ])
            .assert()
            .code(1)
            .stdout(predicate::str::contains(r#""status":404"#));
    }

    #[test]
    fn unknown_response_operation() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{}"#);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                payload.to_str().unwrap(),
                "--route",
                "/pets",
                "--method",
                "delete",
                "--status",
                "204",
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no operation delete /pets"));
    }

    #[test]
    fn malformed_path_param_argument() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);
        let payload = write_temp_file(&dir, "pet.json", r#"{}"#);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                payload.to_str().unwrap(),
                "--route",
                "/pets/{id}",
                "--method",
                "get",
                "--path-param",
                "id",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("expected NAME=VALUE"));
    }

    #[test]
    fn missing_payload() {
        let dir = TempDir::new().unwrap();
        let doc = write_temp_file(&dir, "openapi.json", PETSTORE);

        cmd()
            .args([
                "validate",
                doc.to_str().unwrap(),
                "/nonexistent/pet.json",
                "--route",
                "/pets",
                "--method",
                "post",
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("loading payload"));
    }
}
