//! Request dispatch and batch coordination
//!
//! [`JsonRpc`] owns the frozen registry and the context factory. It turns raw
//! payloads into responses: single objects are validated and dispatched on
//! their own, arrays are validated as a whole before any element runs.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::errors::AppError;
use crate::rpc::{
    context::{ContextFactory, ContextGuard, ExecutionContext},
    error::{app_error_to_rpc, RpcError, INVALID_PARAMS},
    registry::{MethodDescriptor, MethodRegistry},
    response::Response,
    validation::{validate_format, validate_params, Params, Request},
};

/// Serialized form of a bare internal error, used if encoding a reply fails.
const INTERNAL_ERROR_BODY: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// Arguments handed to a handler, with defaults already applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    named: Map<String, Value>,
    positional: Option<Value>,
}

impl Arguments {
    /// Binds params to the descriptor's parameters.
    ///
    /// A bare value needs a parameter to land on; methods declaring none
    /// reject it as invalid params.
    pub fn bind<C: ExecutionContext>(
        descriptor: &MethodDescriptor<C>,
        params: Params,
    ) -> Result<Self, RpcError> {
        let mut arguments = Self::default();
        match params {
            Params::Absent => {}
            Params::Named(named) => arguments.named = named,
            Params::Positional(value) => {
                let Some(first) = descriptor.first_param() else {
                    debug!(
                        method = descriptor.name(),
                        "positional params sent to a method without parameters"
                    );
                    return Err(RpcError::invalid_params());
                };
                arguments.named.insert(first.to_string(), value.clone());
                arguments.positional = Some(value);
            }
        }

        for (name, default) in descriptor.optional_params() {
            arguments
                .named
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }
        Ok(arguments)
    }

    /// Deserializes argument `name`. Missing or mistyped arguments are
    /// reported to the caller as invalid params.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, AppError> {
        let value = self.named.get(name).ok_or_else(|| {
            RpcError::with_message(INVALID_PARAMS, format!("missing parameter \"{name}\""))
        })?;

        serde_json::from_value(value.clone()).map_err(|_| {
            AppError::Rpc(RpcError::with_message(
                INVALID_PARAMS,
                format!("parameter \"{name}\" has the wrong type"),
            ))
        })
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// The raw value when params were sent as a single non-object value.
    pub fn positional(&self) -> Option<&Value> {
        self.positional.as_ref()
    }

    pub fn named(&self) -> &Map<String, Value> {
        &self.named
    }
}

/// What a payload produces on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Single(Response),
    Batch(Vec<Response>),
}

pub struct JsonRpc<F: ContextFactory> {
    registry: MethodRegistry<F::Context>,
    factory: F,
}

impl<F: ContextFactory> JsonRpc<F> {
    pub fn new(registry: MethodRegistry<F::Context>, factory: F) -> Self {
        Self { registry, factory }
    }

    pub fn registry(&self) -> &MethodRegistry<F::Context> {
        &self.registry
    }

    /// Runs both validation phases against one request object.
    pub fn validate(&self, object: &Map<String, Value>) -> Result<(), RpcError> {
        validate_format(object)?;
        validate_params(object, &self.registry)?;
        Ok(())
    }

    /// Invokes the handler for an already validated request.
    pub async fn dispatch(
        &self,
        request: Request,
        context: &F::Context,
    ) -> Result<Value, RpcError> {
        let descriptor = self
            .registry
            .resolve(&request.method)
            .ok_or_else(RpcError::method_not_found)?;
        let arguments = Arguments::bind(descriptor, request.params)?;

        let call = AssertUnwindSafe(descriptor.handler().call(context, arguments))
            .catch_unwind()
            .await;

        match call {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(app_error_to_rpc(&request.method, err)),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(method = %request.method, panic = %detail, "jsonrpc handler panicked");
                Err(RpcError::internal_error())
            }
        }
    }

    /// Handles one request object. Returns `None` for notifications.
    pub async fn handle_request(
        &self,
        object: &Map<String, Value>,
        validate: bool,
    ) -> Option<Response> {
        debug!(
            request = %serde_json::Value::Object(object.clone()),
            "jsonrpc request"
        );
        let id = object.get("id").cloned();

        let context = match self.factory.acquire() {
            Ok(context) => ContextGuard::new(context),
            Err(err) => {
                let method = object.get("method").and_then(Value::as_str).unwrap_or("");
                return Some(app_error_to_rpc(method, err).to_response(id));
            }
        };

        let mut notification = false;
        let outcome = match self.prepare(object, validate) {
            Ok(request) => {
                notification = self
                    .registry
                    .resolve(&request.method)
                    .is_some_and(MethodDescriptor::is_notification);
                self.dispatch(request, &context).await
            }
            Err(err) => Err(err),
        };
        context.finish();

        let response = match outcome {
            Ok(result) => Response::result(id.unwrap_or(Value::Null), result),
            Err(err) => err.to_response(id),
        };
        debug!(
            response = ?response,
            is_error = response.is_error(),
            notification,
            "jsonrpc response"
        );

        if notification {
            None
        } else {
            Some(response)
        }
    }

    fn prepare(&self, object: &Map<String, Value>, validate: bool) -> Result<Request, RpcError> {
        if validate {
            self.validate(object)?;
        }
        Request::from_object(object)
    }

    /// Validates every element before running any of them, then runs them
    /// in order. Notifications contribute no entry.
    pub async fn handle_batch(&self, items: &[Value]) -> Option<Reply> {
        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Object(object) => objects.push(object),
                other => {
                    debug!(item = %other, "jsonrpc batch element is not an object");
                    return Some(Reply::Single(RpcError::parse_error().to_response(None)));
                }
            }
        }
        if objects.is_empty() {
            debug!("jsonrpc batch is empty");
            return Some(Reply::Single(RpcError::parse_error().to_response(None)));
        }

        for object in &objects {
            if let Err(err) = self.validate(object) {
                debug!(code = err.code, "jsonrpc batch rejected during validation");
                return Some(Reply::Single(err.to_response(object.get("id").cloned())));
            }
        }

        let mut responses = Vec::with_capacity(objects.len());
        for object in objects {
            if let Some(response) = self.handle_request(object, false).await {
                responses.push(response);
            }
        }

        if responses.is_empty() {
            None
        } else {
            Some(Reply::Batch(responses))
        }
    }

    pub async fn handle_value(&self, payload: Value) -> Option<Reply> {
        match payload {
            Value::Object(object) => self.handle_request(&object, true).await.map(Reply::Single),
            Value::Array(items) => self.handle_batch(&items).await,
            other => {
                debug!(payload = %other, "jsonrpc payload is neither object nor array");
                Some(Reply::Single(RpcError::parse_error().to_response(None)))
            }
        }
    }

    /// Entry point for raw payloads. `None` means nothing is sent back.
    pub async fn handle_text(&self, raw: impl AsRef<[u8]>) -> Option<String> {
        let reply = match serde_json::from_slice::<Value>(raw.as_ref()) {
            Ok(payload) => self.handle_value(payload).await?,
            Err(err) => {
                debug!(error = %err, "jsonrpc payload is not valid json");
                Reply::Single(RpcError::parse_error().to_response(None))
            }
        };

        match serde_json::to_string(&reply) {
            Ok(body) => Some(body),
            Err(err) => {
                error!(error = %err, "failed to serialize jsonrpc reply");
                Some(INTERNAL_ERROR_BODY.to_string())
            }
        }
    }
}

/// Object-safe face of the engine, so transports need not know the context type.
#[async_trait]
pub trait RpcService: Send + Sync {
    async fn respond(&self, body: &[u8]) -> Option<String>;
}

#[async_trait]
impl<F: ContextFactory> RpcService for JsonRpc<F> {
    async fn respond(&self, body: &[u8]) -> Option<String> {
        self.handle_text(body).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::rpc::context::testing::{Ledger, TrackedContext};
    use crate::rpc::error::{INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
    use crate::rpc::registry::{handler_fn, RpcHandler};

    type Calls = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        calls: Calls,
        tag: &'static str,
    }

    #[async_trait]
    impl RpcHandler<TrackedContext> for Recorder {
        async fn call(
            &self,
            _context: &TrackedContext,
            args: Arguments,
        ) -> Result<Value, AppError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("{}:{}", self.tag, Value::Object(args.named().clone())));
            Ok(json!(self.tag))
        }
    }

    struct Fixture {
        ledger: Arc<Ledger>,
        calls: Calls,
        engine: JsonRpc<Box<dyn Fn() -> TrackedContext + Send + Sync>>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(Ledger::default());
        let calls: Calls = Arc::default();

        let mut registry = MethodRegistry::new();
        registry.register_all([
            MethodDescriptor::standard(
                "add",
                handler_fn(|_: &TrackedContext, args| {
                    let a: i64 = args.get("a")?;
                    let b: i64 = args.get("b")?;
                    Ok(json!(a + b))
                }),
            )
            .required(["a", "b"]),
            MethodDescriptor::standard(
                "double",
                handler_fn(|_: &TrackedContext, args| {
                    let x: i64 = args.get("x")?;
                    Ok(json!(x * 2))
                }),
            )
            .required(["x"]),
            MethodDescriptor::standard(
                "greet",
                handler_fn(|_: &TrackedContext, args| {
                    let name: String = args.get("name")?;
                    let greeting: String = args.get("greeting")?;
                    Ok(json!(format!("{greeting}, {name}")))
                }),
            )
            .optional("name", json!("world"))
            .optional("greeting", json!("Hello")),
            MethodDescriptor::standard(
                "fail",
                handler_fn(|_: &TrackedContext, _| {
                    Err(AppError::internal("connection refused by db-primary:5432"))
                }),
            ),
            MethodDescriptor::standard(
                "reject",
                handler_fn(|_: &TrackedContext, _| {
                    Err(RpcError::with_message(-32050, "quota exhausted").into())
                }),
            ),
            MethodDescriptor::standard(
                "explode",
                handler_fn(|_: &TrackedContext, _| panic!("secret panic detail")),
            ),
            MethodDescriptor::standard(
                "first",
                Recorder {
                    calls: Arc::clone(&calls),
                    tag: "first",
                },
            ),
            MethodDescriptor::standard(
                "second",
                Recorder {
                    calls: Arc::clone(&calls),
                    tag: "second",
                },
            ),
            MethodDescriptor::notification(
                "note",
                Recorder {
                    calls: Arc::clone(&calls),
                    tag: "note",
                },
            ),
            MethodDescriptor::notification(
                "note_fail",
                handler_fn(|_: &TrackedContext, _| Err(AppError::internal("lost"))),
            ),
        ]);

        let factory_ledger = Arc::clone(&ledger);
        let factory: Box<dyn Fn() -> TrackedContext + Send + Sync> =
            Box::new(move || TrackedContext::open(&factory_ledger));

        Fixture {
            ledger,
            calls,
            engine: JsonRpc::new(registry, factory),
        }
    }

    async fn call(fixture: &Fixture, payload: &str) -> Option<Value> {
        fixture
            .engine
            .handle_text(payload)
            .await
            .map(|body| serde_json::from_str(&body).expect("reply is json"))
    }

    fn calls(fixture: &Fixture) -> Vec<String> {
        fixture.calls.lock().expect("calls lock").clone()
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
        assert_eq!(reply, Some(json!({"jsonrpc": "2.0", "id": 1, "result": "pong"})));
        assert_eq!(fixture.ledger.acquired(), 1);
        assert_eq!(fixture.ledger.released(), 1);
    }

    #[tokio::test]
    async fn named_and_positional_params_are_bound() {
        let fixture = fixture();
        let named = call(
            &fixture,
            r#"{"jsonrpc":"2.0","method":"add","params":{"a":2,"b":40},"id":"x"}"#,
        )
        .await
        .expect("reply");
        assert_eq!(named["result"], json!(42));
        assert_eq!(named["id"], json!("x"));

        let positional = call(
            &fixture,
            r#"{"jsonrpc":"2.0","method":"double","params":21,"id":2}"#,
        )
        .await
        .expect("reply");
        assert_eq!(positional["result"], json!(42));
    }

    #[tokio::test]
    async fn defaults_fill_omitted_optional_params() {
        let fixture = fixture();
        let absent = call(&fixture, r#"{"jsonrpc":"2.0","method":"greet","id":1}"#)
            .await
            .expect("reply");
        assert_eq!(absent["result"], json!("Hello, world"));

        let positional = call(
            &fixture,
            r#"{"jsonrpc":"2.0","method":"greet","params":"Ada","id":2}"#,
        )
        .await
        .expect("reply");
        assert_eq!(positional["result"], json!("Hello, Ada"));
    }

    #[tokio::test]
    async fn mistyped_argument_is_invalid_params() {
        let fixture = fixture();
        let reply = call(
            &fixture,
            r#"{"jsonrpc":"2.0","method":"double","params":"many","id":3}"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply["error"]["code"], json!(INVALID_PARAMS));
        assert_eq!(reply["id"], json!(3));
    }

    #[tokio::test]
    async fn handler_failure_is_internal_error_without_detail() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"fail","id":9}"#)
            .await
            .expect("reply");
        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "id": 9,
                "error": {"code": INTERNAL_ERROR, "message": "Internal error"}
            })
        );
        assert!(!reply.to_string().contains("db-primary"));
        assert_eq!(fixture.ledger.released(), 1);
    }

    #[tokio::test]
    async fn handler_rpc_errors_pass_through() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"reject","id":1}"#)
            .await
            .expect("reply");
        assert_eq!(reply["error"], json!({"code": -32050, "message": "quota exhausted"}));
    }

    #[tokio::test]
    async fn handler_panic_is_internal_error_and_releases_context() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"explode","id":1}"#)
            .await
            .expect("reply");
        assert_eq!(reply["error"]["code"], json!(INTERNAL_ERROR));
        assert!(!reply.to_string().contains("secret"));
        assert_eq!(fixture.ledger.acquired(), 1);
        assert_eq!(fixture.ledger.released(), 1);
    }

    #[tokio::test]
    async fn validation_failure_still_releases_context() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"nope","id":5}"#)
            .await
            .expect("reply");
        assert_eq!(reply["error"]["code"], json!(METHOD_NOT_FOUND));
        assert_eq!(reply["id"], json!(5));
        assert_eq!(fixture.ledger.acquired(), 1);
        assert_eq!(fixture.ledger.released(), 1);
    }

    #[tokio::test]
    async fn invalid_request_without_id_echoes_null() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"1.0","method":"ping"}"#)
            .await
            .expect("reply");
        assert_eq!(reply["error"]["code"], json!(INVALID_REQUEST));
        assert_eq!(reply["id"], json!(null));
    }

    #[tokio::test]
    async fn notifications_produce_no_output() {
        let fixture = fixture();
        assert_eq!(
            call(&fixture, r#"{"jsonrpc":"2.0","method":"note","params":{}}"#).await,
            None
        );
        assert_eq!(calls(&fixture), ["note:{}"]);

        // handler failures of notifications are swallowed too
        assert_eq!(call(&fixture, r#"{"jsonrpc":"2.0","method":"note_fail"}"#).await, None);
        assert_eq!(fixture.ledger.released(), 2);
    }

    #[tokio::test]
    async fn notification_with_id_is_rejected() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"note","id":1}"#)
            .await
            .expect("validation errors are reported");
        assert_eq!(reply["error"]["code"], json!(INVALID_PARAMS));
        assert!(calls(&fixture).is_empty());
    }

    #[tokio::test]
    async fn malformed_and_scalar_payloads_are_parse_errors() {
        let fixture = fixture();
        for payload in ["{not json", "42", "\"text\"", "null", ""] {
            let reply = call(&fixture, payload).await.expect("reply");
            assert_eq!(reply["error"]["code"], json!(PARSE_ERROR), "payload {payload:?}");
            assert_eq!(reply["id"], json!(null));
        }
        assert_eq!(fixture.ledger.acquired(), 0);
    }

    #[tokio::test]
    async fn batch_runs_in_order() {
        let fixture = fixture();
        let reply = call(
            &fixture,
            r#"[{"jsonrpc":"2.0","method":"second","id":"b"},{"jsonrpc":"2.0","method":"first","id":"a"}]"#,
        )
        .await
        .expect("reply");

        assert_eq!(
            reply,
            json!([
                {"jsonrpc": "2.0", "id": "b", "result": "second"},
                {"jsonrpc": "2.0", "id": "a", "result": "first"}
            ])
        );
        assert_eq!(calls(&fixture), ["second:{}", "first:{}"]);
        assert_eq!(fixture.ledger.acquired(), 2);
        assert_eq!(fixture.ledger.released(), 2);
    }

    #[tokio::test]
    async fn batch_with_invalid_element_runs_nothing() {
        let fixture = fixture();
        let reply = call(
            &fixture,
            r#"[{"jsonrpc":"2.0","method":"first","id":1},{"jsonrpc":"2.0","id":2}]"#,
        )
        .await
        .expect("reply");

        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "error": {"code": INVALID_REQUEST, "message": "Invalid Request"}
            })
        );
        assert!(calls(&fixture).is_empty());
        assert_eq!(fixture.ledger.acquired(), 0);
    }

    #[tokio::test]
    async fn batch_reports_first_failing_element() {
        let fixture = fixture();
        let reply = call(
            &fixture,
            r#"[{"jsonrpc":"2.0","method":"nope","id":"m"},{"jsonrpc":"2.0","method":"ping"}]"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply["error"]["code"], json!(METHOD_NOT_FOUND));
        assert_eq!(reply["id"], json!("m"));
    }

    #[tokio::test]
    async fn empty_batch_or_non_object_element_is_parse_error() {
        let fixture = fixture();
        for payload in ["[]", r#"[{"jsonrpc":"2.0","method":"first","id":1}, 3]"#] {
            let reply = call(&fixture, payload).await.expect("reply");
            assert_eq!(reply["error"]["code"], json!(PARSE_ERROR));
            assert_eq!(reply["id"], json!(null));
        }
        assert!(calls(&fixture).is_empty());
    }

    #[tokio::test]
    async fn batch_omits_notification_entries() {
        let fixture = fixture();
        let reply = call(
            &fixture,
            r#"[{"jsonrpc":"2.0","method":"note"},{"jsonrpc":"2.0","method":"ping","id":1}]"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply, json!([{"jsonrpc": "2.0", "id": 1, "result": "pong"}]));
        assert_eq!(calls(&fixture), ["note:{}"]);

        let only_notifications = call(
            &fixture,
            r#"[{"jsonrpc":"2.0","method":"note"},{"jsonrpc":"2.0","method":"note"}]"#,
        )
        .await;
        assert_eq!(only_notifications, None);
        assert_eq!(fixture.ledger.released(), 4);
    }

    #[tokio::test]
    async fn batch_handler_errors_stay_per_element() {
        let fixture = fixture();
        let reply = call(
            &fixture,
            r#"[{"jsonrpc":"2.0","method":"fail","id":1},{"jsonrpc":"2.0","method":"first","id":2}]"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply[0]["error"]["code"], json!(INTERNAL_ERROR));
        assert_eq!(reply[1]["result"], json!("first"));
    }

    #[tokio::test]
    async fn failing_context_factory_yields_internal_error() {
        struct Unavailable;

        impl ContextFactory for Unavailable {
            type Context = TrackedContext;

            fn acquire(&self) -> Result<TrackedContext, AppError> {
                Err(AppError::internal("pool exhausted"))
            }
        }

        let engine = JsonRpc::new(MethodRegistry::new(), Unavailable);
        let body = engine
            .handle_text(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
            .await
            .expect("reply");
        let reply: Value = serde_json::from_str(&body).expect("reply is json");
        assert_eq!(reply["error"]["code"], json!(INTERNAL_ERROR));
        assert_eq!(reply["id"], json!(1));
    }

    #[test]
    fn bind_maps_positional_value_to_first_param() {
        let descriptor = MethodDescriptor::standard(
            "pair",
            handler_fn(|_: &TrackedContext, _| Ok(Value::Null)),
        )
        .required(["left"])
        .optional("right", json!(0));

        let args = Arguments::bind(&descriptor, Params::Positional(json!([1, 2])))
            .expect("positional value binds to \"left\"");
        assert_eq!(args.positional(), Some(&json!([1, 2])));
        assert_eq!(args.value("left"), Some(&json!([1, 2])));
        assert_eq!(args.value("right"), Some(&json!(0)));
    }

    #[test]
    fn bind_rejects_positional_value_without_params() {
        let descriptor = MethodDescriptor::standard(
            "bare",
            handler_fn(|_: &TrackedContext, _| Ok(Value::Null)),
        );

        let error = Arguments::bind(&descriptor, Params::Positional(json!(5)))
            .expect_err("nothing to bind the value to");
        assert_eq!(error.code, INVALID_PARAMS);

        let args = Arguments::bind(&descriptor, Params::Absent).expect("no params binds");
        assert!(args.named().is_empty());
    }

    #[tokio::test]
    async fn ping_with_positional_params_is_invalid_params() {
        let fixture = fixture();
        let reply = call(&fixture, r#"{"jsonrpc":"2.0","method":"ping","params":5,"id":1}"#)
            .await
            .expect("reply");
        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": INVALID_PARAMS, "message": "Invalid params"}
            })
        );
        assert_eq!(fixture.ledger.acquired(), 1);
        assert_eq!(fixture.ledger.released(), 1);
    }
}
