use std::io::{BufRead, BufReader, Write};
use std::panic::AssertUnwindSafe;

use pal_services::Services;
use pal_types::{Error, ErrorKind};
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use super::dto::{
    CheckpointArgs, ContextArgs, EscalateArgs, HierarchyArgs, PortEndArgs, PortStartArgs,
    SessionArgs, StatusArgs,
};
use super::tools;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    fn domain(id: Value, err: Error) -> Self {
        let data = err.cause_id().map(|cause| {
            json!({
                "kind": err.kind(),
                "cause_id": cause,
            })
        });
        Self::err(id, err.kind().rpc_code(), err.to_string(), data)
    }
}

/// The agent-facing tool server. One JSON object per line on stdin, one
/// response per line on stdout. Handler panics become `Internal` error
/// responses; the connection itself never dies on a handler error.
pub struct ToolServer {
    services: Services,
}

impl ToolServer {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Handle one request line, returning the serialized response line.
    /// Blank input produces no response.
    pub fn handle_request_line(&self, line: &str) -> Option<String> {
        self.handle_line(line)
            .and_then(|response| serde_json::to_string(&response).ok())
    }

    fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::err(
                    Value::Number(serde_json::Number::from(-1)),
                    -32700,
                    format!("Parse error: {}", e),
                    None,
                ));
            }
        };
        Some(self.handle_request(request))
    }

    fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| Value::Number(serde_json::Number::from(0)));
        let params = request.params.unwrap_or_else(|| json!({}));

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => {
                let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                    return JsonRpcResponse::err(id, -32602, "Missing tool name", None);
                };
                let name = name.to_string();
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                self.dispatch(id, &name, arguments)
            }
            // the tool methods double as direct JSON-RPC methods
            method => {
                let method = method.to_string();
                self.dispatch(id, &method, params)
            }
        }
    }

    fn handle_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "pal",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "instructions": "pal coordination core. Use status to see the port frontier, port_start/port_end to drive work units, checkpoint to snapshot your context, and escalate when blocked.",
            }),
        )
    }

    fn handle_list_tools(&self, id: Value) -> JsonRpcResponse {
        let tool = |name: &str, description: &str, schema: Value| {
            json!({ "name": name, "description": description, "inputSchema": schema })
        };
        let schema = |s: schemars::Schema| serde_json::to_value(s).unwrap_or_else(|_| json!({}));

        JsonRpcResponse::ok(
            id,
            json!({
                "tools": [
                    tool("status", "Active and pending ports plus next-step suggestions",
                         schema(schema_for!(StatusArgs))),
                    tool("port_start", "Upsert and start a port; returns its context and checklist",
                         schema(schema_for!(PortStartArgs))),
                    tool("port_end", "Hand the completion checklist to the gate",
                         schema(schema_for!(PortEndArgs))),
                    tool("checkpoint", "Create, restore or list checkpoints for a session",
                         schema(schema_for!(CheckpointArgs))),
                    tool("escalate", "Open an escalation for a blocker",
                         schema(schema_for!(EscalateArgs))),
                    tool("context", "Read-only projection of ports, conventions and documents",
                         schema(schema_for!(ContextArgs))),
                    tool("session", "Session snapshot with attention and active ports",
                         schema(schema_for!(SessionArgs))),
                    tool("hierarchy", "Session tree with port grouping",
                         schema(schema_for!(HierarchyArgs))),
                ]
            }),
        )
    }

    const TOOL_NAMES: &'static [&'static str] = &[
        "status",
        "port_start",
        "port_end",
        "checkpoint",
        "escalate",
        "context",
        "session",
        "hierarchy",
    ];

    fn dispatch(&self, id: Value, method: &str, params: Value) -> JsonRpcResponse {
        if !Self::TOOL_NAMES.contains(&method) {
            return JsonRpcResponse::err(
                id,
                -32601,
                format!("Method not found: {}", method),
                None,
            );
        }

        let services = &self.services;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(
            || -> pal_types::Result<Value> {
                match method {
                    "status" => tools::handle_status(services, parse(params)?),
                    "port_start" => tools::handle_port_start(services, parse(params)?),
                    "port_end" => tools::handle_port_end(services, parse(params)?),
                    "checkpoint" => tools::handle_checkpoint(services, parse(params)?),
                    "escalate" => tools::handle_escalate(services, parse(params)?),
                    "context" => tools::handle_context(services, parse(params)?),
                    "session" => tools::handle_session(services, parse(params)?),
                    "hierarchy" => tools::handle_hierarchy(services, parse(params)?),
                    _ => unreachable!("name checked against TOOL_NAMES"),
                }
            },
        ));

        match outcome {
            Ok(Ok(result)) => JsonRpcResponse::ok(id, result),
            Ok(Err(err)) => JsonRpcResponse::domain(id, err),
            Err(_panic) => {
                warn!(method, "tool handler panicked");
                JsonRpcResponse::err(
                    id,
                    ErrorKind::Internal.rpc_code(),
                    "Internal error in tool handler",
                    None,
                )
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> pal_types::Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::invalid_argument(format!("Invalid params: {}", e)))
}

/// Blocking stdio loop: the process serves one agent until its stdin
/// closes.
pub fn run_stdio_server(services: Services) -> anyhow::Result<()> {
    let server = ToolServer::new(services);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let reader = BufReader::new(stdin);

    for line in reader.lines() {
        let line = line?;
        if let Some(response) = server.handle_request_line(&line) {
            writeln!(stdout, "{}", response)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_store::Store;
    use pal_types::PalConfig;

    fn server() -> ToolServer {
        ToolServer::new(Services::new(
            Store::open_in_memory().unwrap(),
            PalConfig::default(),
        ))
    }

    fn call(server: &ToolServer, line: &str) -> Value {
        let response = server.handle_line(line).expect("response");
        serde_json::to_value(&response).unwrap()
    }

    #[test]
    fn test_initialize_handshake() {
        let server = server();
        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        );
        assert_eq!(response["result"]["serverInfo"]["name"], "pal");
        assert!(response["error"].is_null());
    }

    #[test]
    fn test_tools_list_names() {
        let server = server();
        let response = call(&server, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        for expected in [
            "status",
            "port_start",
            "port_end",
            "checkpoint",
            "escalate",
            "context",
            "session",
            "hierarchy",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
    }

    #[test]
    fn test_port_lifecycle_over_rpc() {
        let server = server();

        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":3,"method":"port_start","params":{"id":"P1","title":"Entity"}}"#,
        );
        assert_eq!(response["result"]["status"], "running");
        assert!(response["result"]["checklist"].as_array().unwrap().len() > 0);

        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":4,"method":"port_end","params":{"id":"P1","checklist":[{"description":"build","required":true,"passed":true}]}}"#,
        );
        assert_eq!(response["result"]["status"], "complete");
        assert_eq!(response["result"]["checklist"]["passed"], true);
    }

    #[test]
    fn test_blocked_port_returns_next_action() {
        let server = server();
        call(
            &server,
            r#"{"jsonrpc":"2.0","id":5,"method":"port_start","params":{"id":"P1"}}"#,
        );
        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":6,"method":"port_end","params":{"id":"P1","checklist":[{"description":"tests","required":true,"passed":false,"message":"3 failing"}]}}"#,
        );
        assert_eq!(response["result"]["status"], "blocked");
        assert!(response["result"]["next_action"]
            .as_str()
            .unwrap()
            .contains("escalation"));
        assert!(response["result"]["escalation_id"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_error_code_mapping() {
        let server = server();

        // unknown method
        let response = call(&server, r#"{"jsonrpc":"2.0","id":7,"method":"explode"}"#);
        assert_eq!(response["error"]["code"], -32601);

        // invalid params
        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":8,"method":"port_start","params":{"title":42}}"#,
        );
        assert_eq!(response["error"]["code"], -32602);

        // conflict surfaces the application code
        call(
            &server,
            r#"{"jsonrpc":"2.0","id":9,"method":"port_start","params":{"id":"P1"}}"#,
        );
        let response = call(
            &server,
            r#"{"jsonrpc":"2.0","id":10,"method":"port_start","params":{"id":"P1"}}"#,
        );
        assert_eq!(response["error"]["code"], 1002);

        // parse errors never kill the loop
        let response = call(&server, "not json at all");
        assert_eq!(response["error"]["code"], -32700);
    }
}
