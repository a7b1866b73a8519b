//! Runner side of the cross-runtime protocol
//!
//! `toolbridge runner` serves `run` requests on stdio by executing the named
//! module in-process. Faults raised by the module are reported in the reply's
//! `exception` field; only protocol problems become JSON-RPC errors.

use std::io::{self, BufRead, Write};

use serde_json::Value;

use crate::invoke::{InProcessBackend, InvocationRequest};
use crate::jsonrpc::{
    INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_EXIT, METHOD_NOT_FOUND, METHOD_RUN, PARSE_ERROR,
    Request, Response, RpcError, RunParams, RunReply, encode_line,
};

/// Serve requests from `input` until `exit` or end of input.
pub fn serve<R: BufRead, W: Write>(mut input: R, mut output: W, backend: &InProcessBackend) -> io::Result<()> {
    log::debug!("Runner serving modules: {:?}", backend.registry());

    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Request is not valid UTF-8: {e}");
                write_response(&mut output, &Response::error(Value::Null, PARSE_ERROR, e.to_string()))?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Unparseable request: {e}");
                write_response(&mut output, &Response::error(Value::Null, PARSE_ERROR, e.to_string()))?;
                continue;
            }
        };

        if request.method == METHOD_EXIT {
            log::debug!("Runner exiting on request");
            break;
        }

        // Notifications other than `exit` need no answer
        let Some(id) = request.id.clone() else {
            log::debug!("Ignoring notification '{}'", request.method);
            continue;
        };

        let response = match handle_request(request, backend) {
            Ok(reply) => match serde_json::to_value(reply) {
                Ok(result) => Response::success(id, result),
                Err(e) => Response::error(id, INVALID_REQUEST, e.to_string()),
            },
            Err(error) => Response::error(id, error.code, error.message),
        };
        write_response(&mut output, &response)?;
    }

    Ok(())
}

fn handle_request(request: Request, backend: &InProcessBackend) -> Result<RunReply, RpcError> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcError {
            code: INVALID_REQUEST,
            message: format!("Unsupported jsonrpc version '{}'", request.jsonrpc),
        });
    }
    if request.method != METHOD_RUN {
        return Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("Unknown method '{}'", request.method),
        });
    }

    let params: RunParams = serde_json::from_value(request.params).map_err(|e| RpcError {
        code: INVALID_PARAMS,
        message: e.to_string(),
    })?;
    Ok(run(params, backend))
}

/// Execute one `run` request in this process.
pub fn run(params: RunParams, backend: &InProcessBackend) -> RunReply {
    let mut argv = params.argv;
    if argv.first() != Some(&params.module) {
        argv.insert(0, params.module.clone());
    }
    let request = InvocationRequest {
        argv,
        use_stdin: params.use_stdin,
        working_dir: params.cwd,
        source_text: params.source,
    };
    log::debug!("Running '{}' in {}", request.command_line(), request.working_dir.display());

    match backend.invoke(&request) {
        Ok(result) => RunReply {
            stdout: result.stdout,
            stderr: result.stderr,
            exception: None,
        },
        Err(failure) => {
            log::error!("{}", failure.report());
            RunReply {
                exception: Some(failure.report()),
                ..RunReply::default()
            }
        }
    }
}

fn write_response<W: Write>(output: &mut W, response: &Response) -> io::Result<()> {
    let line = encode_line(response).map_err(io::Error::other)?;
    output.write_all(line.as_bytes())?;
    output.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleRegistry, ModuleSearchPath};
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Arc;

    fn backend() -> InProcessBackend {
        InProcessBackend::new(ModuleRegistry::with_builtins(), Arc::new(ModuleSearchPath::default()))
    }

    fn serve_lines(lines: &[Value]) -> Vec<Value> {
        let input: String = lines.iter().map(|l| format!("{l}\n")).collect();
        serve_raw(&input)
    }

    fn serve_raw(input: &str) -> Vec<Value> {
        serve_bytes(input.as_bytes().to_vec())
    }

    fn serve_bytes(input: Vec<u8>) -> Vec<Value> {
        let mut output = Vec::new();
        serve(Cursor::new(input), &mut output, &backend()).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn run_request(id: u64, module: &str, source: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "run",
            "params": {
                "module": module,
                "argv": [module, "--check"],
                "useStdin": true,
                "cwd": std::env::temp_dir(),
                "source": source,
                "workspace": "/w"
            }
        })
    }

    #[test]
    fn test_run_request() {
        let responses = serve_lines(&[run_request(1, "echo", "hello\n")]);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["stdout"], "hello\n");
        assert_eq!(responses[0]["result"]["stderr"], "flags: --check\n");
        assert_eq!(responses[0]["result"]["exception"], Value::Null);
    }

    #[test]
    fn test_module_fault_is_reported_as_exception() {
        let responses = serve_lines(&[run_request(4, "missing", "")]);
        let result = &responses[0]["result"];
        assert_eq!(result["stdout"], "");
        assert!(result["exception"].as_str().unwrap().contains("No module named 'missing'"));
    }

    #[test]
    fn test_parse_error_keeps_serving() {
        let input = format!("this is not json\n{}\n", run_request(2, "echo", "after"));
        let responses = serve_raw(&input);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["result"]["stdout"], "after");
    }

    #[test]
    fn test_invalid_utf8_line_keeps_serving() {
        let mut input = b"{\"jsonrpc\": \"2.0\", \"id\": 1, \xff\xfe}\n".to_vec();
        input.extend(format!("{}\n", run_request(2, "echo", "after")).into_bytes());

        let responses = serve_bytes(input);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["stdout"], "after");
    }

    #[test]
    fn test_unknown_method() {
        let responses = serve_lines(&[json!({"jsonrpc": "2.0", "id": 9, "method": "format", "params": {}})]);
        assert_eq!(responses[0]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(responses[0]["id"], 9);
    }

    #[test]
    fn test_invalid_params() {
        let responses = serve_lines(&[json!({"jsonrpc": "2.0", "id": 3, "method": "run", "params": {"module": 1}})]);
        assert_eq!(responses[0]["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn test_exit_stops_serving() {
        let responses = serve_lines(&[
            json!({"jsonrpc": "2.0", "method": "exit"}),
            run_request(5, "echo", "never"),
        ]);
        assert!(responses.is_empty());
    }

    #[test]
    fn test_module_name_prepended_when_missing() {
        let reply = run(
            RunParams {
                module: "echo".to_string(),
                argv: vec!["--flag".to_string()],
                use_stdin: true,
                cwd: std::env::temp_dir(),
                source: Some("x".to_string()),
                workspace: None,
            },
            &backend(),
        );
        assert_eq!(reply.stdout, "x");
        assert_eq!(reply.stderr, "flags: --flag\n");
    }
}
