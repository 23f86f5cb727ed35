//! The script engine seam and its Rhai implementation.
//!
//! # Responsibilities
//! - Evaluate one script at a time against persistent interpreter state
//! - Keep every function any script defines callable from later scripts
//! - Render results as text
//!
//! # Design Decisions
//! - `ScriptEngine` takes `&mut self`: exclusive access is enforced by the
//!   type system, and the serializer is the only owner
//! - Top-level `let` bindings live in one long-lived `Scope`, like globals

use std::collections::HashSet;

use rhai::{Dynamic, Engine, Scope, AST};

use crate::error::{Error, Result};
use crate::script::bindings;
use crate::script::host::Host;
use crate::script::ExecutionScope;

/// Anything that can run scripts for the serializer.
pub trait ScriptEngine: Send + 'static {
    /// Run `script` to completion with `scope` visible to host commands.
    fn execute(&mut self, script: &str, scope: ExecutionScope) -> Result<String>;
}

/// Resource limits for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// 0 means unlimited.
    pub max_operations: u64,
    pub max_call_levels: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
        }
    }
}

/// Rhai-backed engine.
pub struct RhaiEngine {
    engine: Engine,
    globals: Scope<'static>,
    library: AST,
    host: Host,
}

impl RhaiEngine {
    pub fn new(host: Host, limits: EngineLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        bindings::register(&mut engine, &host);

        Self {
            engine,
            globals: Scope::new(),
            library: AST::empty(),
            host,
        }
    }

    fn run(&mut self, script: &str) -> Result<String> {
        let ast = self
            .engine
            .compile(script)
            .map_err(|e| Error::Script(e.to_string()))?;

        // Functions from a script that compiled stay available even if it fails at runtime.
        let program = self.library.merge(&ast);
        self.library = self.library.merge(&ast.clone_functions_only());

        let before = self.globals.len();
        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut self.globals, &program);
        if self.globals.len() > before {
            compact(&mut self.globals);
        }

        result
            .map(render)
            .map_err(|e| Error::Script(e.to_string()))
    }
}

impl ScriptEngine for RhaiEngine {
    fn execute(&mut self, script: &str, scope: ExecutionScope) -> Result<String> {
        let host = self.host.clone();
        let _guard = host.enter(scope);
        self.run(script)
    }
}

impl std::fmt::Debug for RhaiEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiEngine")
            .field("globals", &self.globals.len())
            .finish_non_exhaustive()
    }
}

/// Drop shadowed globals so a route body that says `let x` on every
/// request keeps one `x`, not one per request.
fn compact(globals: &mut Scope<'static>) {
    let mut seen = HashSet::new();
    let mut latest: Vec<(String, bool, Dynamic)> = Vec::with_capacity(globals.len());
    let entries: Vec<_> = globals
        .iter()
        .map(|(name, constant, value)| (name.to_string(), constant, value))
        .collect();
    for (name, constant, value) in entries.into_iter().rev() {
        if seen.insert(name.clone()) {
            latest.push((name, constant, value));
        }
    }
    if latest.len() == globals.len() {
        return;
    }

    let mut compacted = Scope::new();
    for (name, constant, value) in latest.into_iter().rev() {
        if constant {
            compacted.push_constant(name, value);
        } else {
            compacted.push(name, value);
        }
    }
    *globals = compacted;
}

fn render(value: Dynamic) -> String {
    if value.is_unit() {
        String::new()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionRegistry;
    use crate::http::context::RequestContext;
    use crate::http::request::RequestData;
    use crate::http::response::{self, PendingResponse};
    use crate::lifecycle::Shutdown;
    use crate::routing::RouteTable;
    use axum::http::{Method, StatusCode};
    use std::sync::{Arc, Mutex};

    struct Fixture {
        engine: RhaiEngine,
        routes: Arc<RouteTable>,
        registry: Arc<ConnectionRegistry>,
        shutdown: Shutdown,
    }

    fn fixture() -> Fixture {
        let routes = Arc::new(RouteTable::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Shutdown::new();
        let host = Host::new(
            Arc::clone(&routes),
            Arc::clone(&registry),
            shutdown.clone(),
            "message",
        );
        Fixture {
            engine: RhaiEngine::new(host, EngineLimits::default()),
            routes,
            registry,
            shutdown,
        }
    }

    fn request(method: Method, target: &str, body: &str) -> (Arc<RequestContext>, PendingResponse) {
        let (sink, pending) = response::channel();
        let ctx = RequestContext::new(RequestData::new(method, target, body.to_string()), Default::default(), sink);
        (Arc::new(ctx), pending)
    }

    #[test]
    fn test_results_are_rendered() {
        let mut f = fixture();
        let detached = ExecutionScope::detached;
        assert_eq!(f.engine.execute("1 + 2", detached()).unwrap(), "3");
        assert_eq!(f.engine.execute("let x = 1;", detached()).unwrap(), "");
        assert_eq!(f.engine.execute("\"hi\"", detached()).unwrap(), "hi");
    }

    #[test]
    fn test_globals_and_functions_persist() {
        let mut f = fixture();
        f.engine
            .execute("let count = 41; fn greet(n) { `Hello, ${n}!` }", ExecutionScope::detached())
            .unwrap();
        assert_eq!(
            f.engine.execute("count += 1; count", ExecutionScope::detached()).unwrap(),
            "42"
        );
        assert_eq!(
            f.engine.execute("greet(\"Ada\")", ExecutionScope::detached()).unwrap(),
            "Hello, Ada!"
        );
    }

    #[test]
    fn test_redeclared_globals_do_not_accumulate() {
        let mut f = fixture();
        for i in 0..5 {
            f.engine
                .execute(&format!("let h = {i}; let k = 1;"), ExecutionScope::detached())
                .unwrap();
        }
        assert_eq!(f.engine.globals.len(), 2);
        assert_eq!(f.engine.execute("h + k", ExecutionScope::detached()).unwrap(), "5");
    }

    #[test]
    fn test_errors_become_script_errors() {
        let mut f = fixture();
        assert!(matches!(
            f.engine.execute("let = ;", ExecutionScope::detached()),
            Err(Error::Script(_))
        ));
        let err = f
            .engine
            .execute("respond(\"x\")", ExecutionScope::detached())
            .unwrap_err();
        assert!(err.to_string().contains("respond: not in request context"));
    }

    #[test]
    fn test_operation_limit() {
        let routes = Arc::new(RouteTable::new());
        let host = Host::new(routes, Arc::new(ConnectionRegistry::new()), Shutdown::new(), "message");
        let mut engine = RhaiEngine::new(
            host,
            EngineLimits {
                max_operations: 1_000,
                max_call_levels: 16,
            },
        );
        assert!(engine
            .execute("loop { }", ExecutionScope::detached())
            .is_err());
    }

    #[test]
    fn test_route_registration_from_script() {
        let mut f = fixture();
        f.engine
            .execute(
                r#"
                fn hello() { respond("Hello, " + param("name") + "!") }
                route("get", "/hello/:name", Fn("hello"));
                route("POST", "/api/echo", "status(201); respond(request::body())");
                route("POST", "/api/echo", "status(202); respond(request::body())");
                "#,
                ExecutionScope::detached(),
            )
            .unwrap();
        assert_eq!(f.routes.len(), 2);
        let matched = f.routes.match_route("GET", "/hello/Ada").unwrap();
        assert_eq!(matched.route.body, "hello()");
        assert_eq!(
            f.engine.execute("routes().len()", ExecutionScope::detached()).unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_response_commands() {
        let mut f = fixture();
        let (ctx, pending) = request(Method::POST, "/api/echo?tag=a", "{\"x\":1}");
        f.engine
            .execute(
                r#"
                status(201);
                header("X-Tag", query("tag"));
                respond(request::body());
                status(500);
                "#,
                ExecutionScope::for_request(Arc::clone(&ctx)),
            )
            .unwrap();
        ctx.finish();

        let (head, body) = pending.collect().await.unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert_eq!(head.headers["x-tag"], "a");
        assert_eq!(&body[..], b"{\"x\":1}");
    }

    #[tokio::test]
    async fn test_hold_info_and_broadcast() {
        let mut f = fixture();
        let (ctx, mut pending) = request(Method::GET, "/room", "");
        let handle = f
            .engine
            .execute(
                "let h = connection::hold(\"room\"); connection::on_close(h, Fn(\"left\")); h",
                ExecutionScope::for_request(Arc::clone(&ctx)),
            )
            .unwrap();
        assert_eq!(handle, "room");

        let info = f
            .engine
            .execute(
                "let i = connection::info(\"room\"); `${i.path} ${i.alias} ${i.on_close}`",
                ExecutionScope::detached(),
            )
            .unwrap();
        assert_eq!(info, "/room room left");

        f.engine
            .execute(
                "for c in connections() { respond(c, \"ping\"); flush(c); } respond(\"gone\", \"x\");",
                ExecutionScope::detached(),
            )
            .unwrap();
        pending.head().await.unwrap();
        assert_eq!(
            &pending.next_chunk().await.unwrap()[..],
            b"event: message\ndata: ping\n\n"
        );

        f.engine
            .execute("connection::close(\"room\")", ExecutionScope::detached())
            .unwrap();
        assert!(f.registry.is_empty());
        assert!(f
            .engine
            .execute("connection::close(\"room\")", ExecutionScope::detached())
            .unwrap_err()
            .to_string()
            .contains("unknown connection: room"));
    }

    #[test]
    fn test_print_reaches_output() {
        let mut f = fixture();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let scope = ExecutionScope::detached().with_output(Arc::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string());
        }));
        f.engine.execute("print(\"a\"); puts(2);", scope).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["a".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_path_module() {
        let mut f = fixture();
        let run = |engine: &mut RhaiEngine, src: &str| {
            engine.execute(src, ExecutionScope::detached()).unwrap()
        };
        assert_eq!(run(&mut f.engine, "path::join(\"static\", \"css\", \"../app.js\")"), "static/app.js");
        assert_eq!(run(&mut f.engine, "path::join([\"/srv\", \"\", \"www\"])"), "/srv/www");
        assert_eq!(run(&mut f.engine, "path::base(\"/a/b.txt\") + \" \" + path::ext(\"/a/b.txt\")"), "b.txt .txt");
        assert_eq!(run(&mut f.engine, "path::dir(\"a/b/c\")"), "a/b");
        assert_eq!(run(&mut f.engine, "path::clean(\"\")"), ".");
        assert_eq!(run(&mut f.engine, "path::exists(\"Cargo.toml\")"), "true");
        assert_eq!(run(&mut f.engine, "path::abs(\"/x/../y\")"), "/y");
    }

    #[test]
    fn test_help_command() {
        let mut f = fixture();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let scope = ExecutionScope::detached().with_output(Arc::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string());
        }));
        f.engine
            .execute("help(\"connection::hold\"); help(\"query\")", scope)
            .unwrap();
        assert_eq!(
            *lines.lock().unwrap(),
            vec![
                "connection::hold(?ALIAS?) - Hold current response open for streaming".to_string(),
                "query(NAME, ?DEFAULT?) - Get query string parameter".to_string(),
            ]
        );

        let err = f
            .engine
            .execute("help(\"path\", \"split\")", ExecutionScope::detached())
            .unwrap_err();
        assert!(err.to_string().contains("help: path has no subcommand \"split\""));
    }

    #[test]
    fn test_shutdown_command() {
        let mut f = fixture();
        f.engine.execute("shutdown()", ExecutionScope::detached()).unwrap();
        assert!(f.shutdown.is_triggered());
    }
}
