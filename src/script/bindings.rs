//! Rhai bindings for the host commands.
//!
//! Optional targets are expressed by arity: the handle, when present, is
//! always the first argument (`respond(body)` vs `respond(handle, body)`).

use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, FnPtr, Map, Module};

use crate::connections::ConnectionInfo;
use crate::error::Error;
use crate::routing::RouteInfo;
use crate::script::host::{Host, Target};
use crate::script::paths;

type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

fn to_rhai(err: Error) -> Box<EvalAltResult> {
    err.to_string().into()
}

/// Blobs are written verbatim, everything else by its display form.
fn body_bytes(body: Dynamic) -> Vec<u8> {
    if body.is_blob() {
        body.try_cast::<Blob>().unwrap_or_default()
    } else {
        body.to_string().into_bytes()
    }
}

fn optional(value: Option<String>) -> Dynamic {
    value.map(Dynamic::from).unwrap_or(Dynamic::UNIT)
}

fn info_map(info: ConnectionInfo) -> Map {
    let mut map = Map::new();
    map.insert("id".into(), Dynamic::from(info.id));
    map.insert("handle".into(), Dynamic::from(info.handle));
    map.insert("alias".into(), optional(info.alias));
    map.insert("method".into(), Dynamic::from(info.method));
    map.insert("path".into(), Dynamic::from(info.path));
    map.insert(
        "opened".into(),
        Dynamic::from(i64::try_from(info.opened).unwrap_or(i64::MAX)),
    );
    map.insert("on_close".into(), optional(info.on_close));
    map
}

fn route_map(route: RouteInfo) -> Map {
    let mut map = Map::new();
    map.insert("method".into(), Dynamic::from(route.method));
    map.insert("pattern".into(), Dynamic::from(route.pattern));
    let params: Array = route.params.into_iter().map(Dynamic::from).collect();
    map.insert("params".into(), Dynamic::from(params));
    map
}

/// Register every host command on `engine`.
pub fn register(engine: &mut Engine, host: &Host) {
    register_output(engine, host);
    register_response(engine, host);
    register_request(engine, host);
    register_connections(engine, host);
    register_routes(engine, host);
    register_paths(engine);
    register_help(engine, host);
}

fn register_output(engine: &mut Engine, host: &Host) {
    let h = host.clone();
    engine.on_print(move |text| h.print(text));
    let h = host.clone();
    engine.on_debug(move |text, _source, _pos| h.print(text));

    let h = host.clone();
    engine.register_fn("puts", move |value: Dynamic| h.print(&value.to_string()));

    let h = host.clone();
    engine.register_fn("shutdown", move || h.shutdown());
}

fn register_response(engine: &mut Engine, host: &Host) {
    let h = host.clone();
    engine.register_fn("respond", move |body: Dynamic| -> RhaiResult<()> {
        h.respond(Target::Current, &body_bytes(body)).map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn(
        "respond",
        move |target: &str, body: Dynamic| -> RhaiResult<()> {
            h.respond(Target::Handle(target), &body_bytes(body))
                .map_err(to_rhai)
        },
    );

    let h = host.clone();
    engine.register_fn("status", move |code: i64| -> RhaiResult<()> {
        h.status(Target::Current, code).map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn("status", move |target: &str, code: i64| -> RhaiResult<()> {
        h.status(Target::Handle(target), code).map_err(to_rhai)
    });

    let h = host.clone();
    engine.register_fn("header", move |name: &str, value: &str| -> RhaiResult<()> {
        h.header(Target::Current, name, value).map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn(
        "header",
        move |target: &str, name: &str, value: &str| -> RhaiResult<()> {
            h.header(Target::Handle(target), name, value)
                .map_err(to_rhai)
        },
    );

    let h = host.clone();
    engine.register_fn("flush", move || -> RhaiResult<()> {
        h.flush(Target::Current).map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn("flush", move |target: &str| -> RhaiResult<()> {
        h.flush(Target::Handle(target)).map_err(to_rhai)
    });
}

fn register_request(engine: &mut Engine, host: &Host) {
    let h = host.clone();
    engine.register_fn("param", move |name: &str| -> RhaiResult<String> {
        h.param(name).map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn("query", move |name: &str| -> RhaiResult<String> {
        h.query(name, "").map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn("query", move |name: &str, default: &str| -> RhaiResult<String> {
        h.query(name, default).map_err(to_rhai)
    });

    let mut module = Module::new();
    let h = host.clone();
    module.set_native_fn("method", move || h.request_method().map_err(to_rhai));
    let h = host.clone();
    module.set_native_fn("path", move || h.request_path().map_err(to_rhai));
    let h = host.clone();
    module.set_native_fn("body", move || h.request_body().map_err(to_rhai));
    let h = host.clone();
    module.set_native_fn("header", move |name: &str| {
        h.request_header(name).map_err(to_rhai)
    });
    engine.register_static_module("request", module.into());
}

fn register_connections(engine: &mut Engine, host: &Host) {
    let mut module = Module::new();

    let h = host.clone();
    module.set_native_fn("hold", move || h.hold(None).map_err(to_rhai));
    let h = host.clone();
    module.set_native_fn("hold", move |alias: &str| {
        h.hold(Some(alias)).map_err(to_rhai)
    });
    let h = host.clone();
    module.set_native_fn("close", move |handle: &str| h.close(handle).map_err(to_rhai));
    let h = host.clone();
    module.set_native_fn("info", move |handle: &str| {
        h.info(handle).map(info_map).map_err(to_rhai)
    });
    let h = host.clone();
    module.set_native_fn("on_close", move |handle: &str, callback: &str| {
        h.on_close(handle, callback).map_err(to_rhai)
    });
    let h = host.clone();
    module.set_native_fn("on_close", move |handle: &str, callback: FnPtr| {
        h.on_close(handle, callback.fn_name()).map_err(to_rhai)
    });
    engine.register_static_module("connection", module.into());

    let h = host.clone();
    engine.register_fn("connections", move || -> Array {
        h.connections().into_iter().map(Dynamic::from).collect()
    });
}

fn register_routes(engine: &mut Engine, host: &Host) {
    let h = host.clone();
    engine.register_fn(
        "route",
        move |method: &str, pattern: &str, body: &str| -> RhaiResult<()> {
            h.route(method, pattern, body).map_err(to_rhai)
        },
    );
    let h = host.clone();
    engine.register_fn(
        "route",
        move |method: &str, pattern: &str, handler: FnPtr| -> RhaiResult<()> {
            let body = format!("{}()", handler.fn_name());
            h.route(method, pattern, &body).map_err(to_rhai)
        },
    );

    let h = host.clone();
    engine.register_fn("routes", move || -> Array {
        h.route_list()
            .into_iter()
            .map(|route| Dynamic::from(route_map(route)))
            .collect()
    });
}

fn register_paths(engine: &mut Engine) {
    let mut module = Module::new();
    module.set_native_fn("join", |a: &str, b: &str| -> RhaiResult<String> {
        Ok(paths::join([a, b]))
    });
    module.set_native_fn("join", |a: &str, b: &str, c: &str| -> RhaiResult<String> {
        Ok(paths::join([a, b, c]))
    });
    module.set_native_fn("join", |parts: Array| -> RhaiResult<String> {
        let parts: Vec<String> = parts.iter().map(|part| part.to_string()).collect();
        Ok(paths::join(parts.iter().map(String::as_str)))
    });
    module.set_native_fn("base", |path: &str| -> RhaiResult<String> { Ok(paths::base(path)) });
    module.set_native_fn("dir", |path: &str| -> RhaiResult<String> { Ok(paths::dir(path)) });
    module.set_native_fn("ext", |path: &str| -> RhaiResult<String> { Ok(paths::ext(path)) });
    module.set_native_fn("clean", |path: &str| -> RhaiResult<String> { Ok(paths::clean(path)) });
    module.set_native_fn("abs", |path: &str| -> RhaiResult<String> {
        paths::abs(path).map_err(|err| to_rhai(Error::argument("path::abs", err.to_string())))
    });
    module.set_native_fn("exists", |path: &str| -> RhaiResult<bool> { Ok(paths::exists(path)) });
    engine.register_static_module("path", module.into());
}

/// `help("path::join")` is the same as `help("path", "join")`.
fn register_help(engine: &mut Engine, host: &Host) {
    let h = host.clone();
    engine.register_fn("help", move || -> RhaiResult<()> { h.help(&[]).map_err(to_rhai) });
    let h = host.clone();
    engine.register_fn("help", move |topic: &str| -> RhaiResult<()> {
        let topic: Vec<&str> = topic.split("::").collect();
        h.help(&topic).map_err(to_rhai)
    });
    let h = host.clone();
    engine.register_fn("help", move |name: &str, sub: &str| -> RhaiResult<()> {
        h.help(&[name, sub]).map_err(to_rhai)
    });
}
