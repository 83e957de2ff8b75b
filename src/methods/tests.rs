use pretty_assertions::assert_eq;

use super::*;
use crate::store::DataStore;
use crate::wire::{INDEX_ERROR, NO_SUCH_METHOD_ERROR, REQUEST_REFUSED_ERROR, TYPE_ERROR};

fn context() -> (Registry, Context) {
    let store = Shared::new(DataStore::new(PlayerConfig::default()));
    let ctx = Context {
        store,
        conffile: Utf8PathBuf::from("/nonexistent/moosic-test/config"),
    };
    (Registry::new(), ctx)
}

fn call(registry: &Registry, ctx: &Context, method: &str, params: Vec<Value>) -> MethodResult {
    registry.dispatch(ctx, method, params, false)
}

fn bytes(s: &str) -> Value {
    Value::Bytes(s.as_bytes().to_vec())
}

fn items(songs: &[&str]) -> Value {
    Value::Array(songs.iter().map(|s| bytes(s)).collect())
}

fn range(ints: &[i64]) -> Value {
    Value::Array(ints.iter().map(|&i| Value::Int(i)).collect())
}

fn queue_of(ctx: &Context) -> Vec<String> {
    ctx.store
        .lock()
        .queue
        .iter()
        .map(|item| String::from_utf8_lossy(item).into_owned())
        .collect()
}

#[test]
fn append_filters_empty_and_reports_length() {
    let (registry, ctx) = context();
    let result = call(
        &registry,
        &ctx,
        "append",
        vec![items(&["/m/a.mp3", "/m/b.mp3", ""])],
    )
    .unwrap();
    assert_eq!(result, Value::Bool(true));
    assert_eq!(
        call(&registry, &ctx, "queue_length", vec![]).unwrap(),
        Value::Int(2)
    );
    assert_eq!(queue_of(&ctx), vec!["/m/a.mp3", "/m/b.mp3"]);
}

#[test]
fn plain_strings_cannot_be_enqueued() {
    let (registry, ctx) = context();
    let fault = call(
        &registry,
        &ctx,
        "append",
        vec![Value::Array(vec![Value::Str("/m/a.mp3".into())])],
    )
    .unwrap_err();
    assert_eq!(fault.code, TYPE_ERROR);
    assert_eq!(fault.string, "Objects of type 'string' cannot be inserted.");
    assert_eq!(queue_of(&ctx), Vec::<String>::new());
}

#[test]
fn malformed_ranges_are_refused_without_mutating() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a", "b"])]).unwrap();
    let before = ctx.store.lock().last_queue_update;

    let fault = call(&registry, &ctx, "cut", vec![range(&[0, 1, 2])]).unwrap_err();
    assert_eq!(fault.code, crate::wire::APPLICATION_ERROR);

    let fault = call(&registry, &ctx, "cut", vec![Value::Int(1)]).unwrap_err();
    assert_eq!(fault.code, TYPE_ERROR);

    let fault = call(
        &registry,
        &ctx,
        "cut",
        vec![Value::Array(vec![Value::Str("x".into())])],
    )
    .unwrap_err();
    assert_eq!(fault.code, crate::wire::APPLICATION_ERROR);

    assert_eq!(ctx.store.lock().last_queue_update, before);
    assert_eq!(queue_of(&ctx), vec!["a", "b"]);
}

#[test]
fn swap_rejects_overlap_and_swaps_adjacent() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a", "b", "c", "d"])]).unwrap();

    let fault = call(
        &registry,
        &ctx,
        "swap",
        vec![range(&[0, 2]), range(&[1, 3])],
    )
    .unwrap_err();
    assert_eq!(fault.code, crate::wire::APPLICATION_ERROR);
    assert_eq!(queue_of(&ctx), vec!["a", "b", "c", "d"]);

    call(&registry, &ctx, "swap", vec![range(&[0, 2]), range(&[2, 4])]).unwrap();
    assert_eq!(queue_of(&ctx), vec!["c", "d", "a", "b"]);
}

#[test]
fn list_and_indexed_list_agree() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a", "b", "c"])]).unwrap();

    let listed = call(&registry, &ctx, "list", vec![range(&[-2])]).unwrap();
    assert_eq!(listed, Value::Array(vec![bytes("b"), bytes("c")]));

    let Value::Struct(fields) =
        call(&registry, &ctx, "indexed_list", vec![range(&[-2])]).unwrap()
    else {
        panic!("expected a struct");
    };
    assert_eq!(fields["start"], Value::Int(1));
    assert_eq!(fields["list"], Value::Array(vec![bytes("b"), bytes("c")]));
}

#[test]
fn cut_list_faults_on_bad_index() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a"])]).unwrap();
    let fault = call(&registry, &ctx, "cut_list", vec![range(&[5])]).unwrap_err();
    assert_eq!(fault.code, INDEX_ERROR);
}

#[test]
fn remove_and_filter_take_patterns() {
    let (registry, ctx) = context();
    call(
        &registry,
        &ctx,
        "append",
        vec![items(&["a.ogg", "b.mp3", "c.ogg"])],
    )
    .unwrap();
    call(&registry, &ctx, "remove", vec![bytes(r"\.mp3$")]).unwrap();
    assert_eq!(queue_of(&ctx), vec!["a.ogg", "c.ogg"]);
    call(&registry, &ctx, "filter", vec![bytes("^a")]).unwrap();
    assert_eq!(queue_of(&ctx), vec!["a.ogg"]);
}

#[test]
fn sub_all_rewrites_queue_items() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["/mnt/d/a.mp3"])]).unwrap();
    call(
        &registry,
        &ctx,
        "sub_all",
        vec![bytes("^/mnt"), bytes("/media")],
    )
    .unwrap();
    assert_eq!(queue_of(&ctx), vec!["/media/d/a.mp3"]);
}

#[test]
fn next_skips_into_history_and_restores_running() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a", "b", "c", "d"])]).unwrap();
    call(&registry, &ctx, "next", vec![Value::Int(2)]).unwrap();
    assert_eq!(queue_of(&ctx), vec!["c", "d"]);
    assert_eq!(
        call(&registry, &ctx, "is_queue_running", vec![]).unwrap(),
        Value::Bool(true)
    );
    let Value::Array(entries) = call(&registry, &ctx, "history", vec![]).unwrap() else {
        panic!("expected an array");
    };
    assert_eq!(entries.len(), 2);
    let Value::Array(first) = &entries[0] else {
        panic!("expected a triple");
    };
    assert_eq!(first[0], bytes("a"));
    assert!(matches!(first[1], Value::Double(_)));
}

#[test]
fn next_keeps_queue_halted_when_it_was() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a", "b"])]).unwrap();
    call(&registry, &ctx, "halt_queue", vec![]).unwrap();
    call(&registry, &ctx, "next", vec![]).unwrap();
    assert_eq!(
        call(&registry, &ctx, "is_queue_running", vec![]).unwrap(),
        Value::Bool(false)
    );
    assert_eq!(queue_of(&ctx), vec!["b"]);
}

#[test]
fn stop_returns_current_to_queue_head() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["a", "b", "c"])]).unwrap();
    ctx.store.lock().current = b"now".to_vec();

    call(&registry, &ctx, "stop", vec![]).unwrap();
    assert_eq!(queue_of(&ctx), vec!["now", "a", "b", "c"]);
    let store = ctx.store.lock();
    assert!(!store.queue_running);
    assert!(store.ignore_finish);
    assert!(store.history.is_empty());
}

#[test]
fn previous_pulls_from_history() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "append", vec![items(&["c"])]).unwrap();
    ctx.store.lock().history.push_back(HistoryEntry {
        item: b"a".to_vec(),
        started: 1.0,
        finished: 2.0,
    });
    call(&registry, &ctx, "previous", vec![]).unwrap();
    assert_eq!(queue_of(&ctx), vec!["a", "c"]);
}

#[test]
fn loop_mode_round_trips() {
    let (registry, ctx) = context();
    assert_eq!(
        call(&registry, &ctx, "is_looping", vec![]).unwrap(),
        Value::Bool(false)
    );
    call(&registry, &ctx, "set_loop_mode", vec![Value::Bool(true)]).unwrap();
    assert_eq!(
        call(&registry, &ctx, "is_looping", vec![]).unwrap(),
        Value::Bool(true)
    );
    call(&registry, &ctx, "toggle_loop_mode", vec![]).unwrap();
    assert_eq!(
        call(&registry, &ctx, "is_looping", vec![]).unwrap(),
        Value::Bool(false)
    );
}

#[test]
fn history_limit_clamps_below_zero() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "set_history_limit", vec![Value::Int(-5)]).unwrap();
    assert_eq!(
        call(&registry, &ctx, "get_history_limit", vec![]).unwrap(),
        Value::Int(0)
    );
}

#[test]
fn current_time_is_zero_while_idle() {
    let (registry, ctx) = context();
    assert_eq!(
        call(&registry, &ctx, "current_time", vec![]).unwrap(),
        Value::Double(0.0)
    );
}

#[test]
fn version_and_api_version_report() {
    let (registry, ctx) = context();
    assert_eq!(
        call(&registry, &ctx, "version", vec![]).unwrap(),
        Value::Str(env!("CARGO_PKG_VERSION").into())
    );
    assert_eq!(
        call(&registry, &ctx, "api_version", vec![]).unwrap(),
        Value::Array(vec![Value::Int(1), Value::Int(8)])
    );
}

#[test]
fn config_queries_render_the_table() {
    let (registry, ctx) = context();
    ctx.store.lock().config =
        PlayerConfig::parse("(?i)\\.mp3$\nmpg123 -q\n").unwrap();
    assert_eq!(
        call(&registry, &ctx, "showconfig", vec![]).unwrap(),
        bytes("(?i)\\.mp3$\n\tmpg123 -q\n")
    );
    assert_eq!(
        call(&registry, &ctx, "getconfig", vec![]).unwrap(),
        Value::Array(vec![Value::Array(vec![
            bytes("(?i)\\.mp3$"),
            bytes("mpg123 -q")
        ])])
    );
}

#[test]
fn reconfigure_failure_keeps_previous_config() {
    let (registry, ctx) = context();
    let config = PlayerConfig::parse("\\.mp3$\nmpg123\n").unwrap();
    ctx.store.lock().config = config;
    let fault = call(&registry, &ctx, "reconfigure", vec![]).unwrap_err();
    assert_eq!(fault.code, crate::wire::INTERNAL_ERROR);
    assert_eq!(ctx.store.lock().config.entries().len(), 1);
}

#[test]
fn die_sets_the_quit_flag() {
    let (registry, ctx) = context();
    call(&registry, &ctx, "die", vec![]).unwrap();
    assert!(ctx.store.lock().quit);
}

#[test]
fn unknown_methods_fault() {
    let (registry, ctx) = context();
    let fault = call(&registry, &ctx, "bogus", vec![]).unwrap_err();
    assert_eq!(fault.code, NO_SUCH_METHOD_ERROR);
}

#[test]
fn introspection_lists_signatures_and_help() {
    let (registry, ctx) = context();
    let Value::Array(names) = call(&registry, &ctx, "system.listMethods", vec![]).unwrap()
    else {
        panic!("expected an array");
    };
    assert!(names.contains(&Value::Str("insert".into())));
    assert!(names.contains(&Value::Str("system.multicall".into())));

    let signature = call(
        &registry,
        &ctx,
        "system.methodSignature",
        vec![Value::Str("append".into())],
    )
    .unwrap();
    assert_eq!(
        signature,
        Value::Array(vec![Value::Array(vec![
            Value::Str("boolean".into()),
            Value::Str("array".into())
        ])])
    );

    let Value::Str(help) = call(
        &registry,
        &ctx,
        "system.methodHelp",
        vec![Value::Str("no_op".into())],
    )
    .unwrap() else {
        panic!("expected a string");
    };
    assert!(help.contains("nothing"));

    let fault = call(
        &registry,
        &ctx,
        "system.methodSignature",
        vec![Value::Str("bogus".into())],
    )
    .unwrap_err();
    assert_eq!(fault.code, NO_SUCH_METHOD_ERROR);
}

#[test]
fn multicall_runs_elements_in_order() {
    let (registry, ctx) = context();
    let mut append = BTreeMap::new();
    append.insert("methodName".to_owned(), Value::Str("append".into()));
    append.insert("params".to_owned(), Value::Array(vec![items(&["a", "b"])]));
    let mut length = BTreeMap::new();
    length.insert("methodName".to_owned(), Value::Str("queue_length".into()));
    let mut bogus = BTreeMap::new();
    bogus.insert("methodName".to_owned(), Value::Str("bogus".into()));

    let Value::Array(results) = call(
        &registry,
        &ctx,
        "system.multicall",
        vec![Value::Array(vec![
            Value::Struct(append),
            Value::Struct(length),
            Value::Struct(bogus),
        ])],
    )
    .unwrap() else {
        panic!("expected an array");
    };
    assert_eq!(results[0], Value::Array(vec![Value::Bool(true)]));
    assert_eq!(results[1], Value::Array(vec![Value::Int(2)]));
    let Value::Struct(fault) = &results[2] else {
        panic!("expected a fault struct");
    };
    assert_eq!(fault["faultCode"], Value::Int(NO_SUCH_METHOD_ERROR));
}

#[test]
fn multicall_refuses_to_nest() {
    let (registry, ctx) = context();
    let mut nested = BTreeMap::new();
    nested.insert(
        "methodName".to_owned(),
        Value::Str("system.multicall".into()),
    );
    nested.insert("params".to_owned(), Value::Array(vec![Value::Array(vec![])]));

    let Value::Array(results) = call(
        &registry,
        &ctx,
        "system.multicall",
        vec![Value::Array(vec![Value::Struct(nested)])],
    )
    .unwrap() else {
        panic!("expected an array");
    };
    let Value::Struct(fault) = &results[0] else {
        panic!("expected a fault struct");
    };
    assert_eq!(fault["faultCode"], Value::Int(REQUEST_REFUSED_ERROR));
}

#[test]
fn wrong_arity_is_a_type_error() {
    let (registry, ctx) = context();
    let fault = call(&registry, &ctx, "no_op", vec![Value::Int(1)]).unwrap_err();
    assert_eq!(fault.code, TYPE_ERROR);
    let fault = call(&registry, &ctx, "insert", vec![items(&["a"])]).unwrap_err();
    assert_eq!(fault.code, TYPE_ERROR);
}
