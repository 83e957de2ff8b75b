//! The operations clients invoke, and the registry that dispatches them.
//!
//! Every method is a thin wrapper: decode arguments off the wire, take the
//! store lock for as short a span as possible, mutate or read, encode the
//! result. Input-validation failures surface as faults without mutating
//! anything. The registry also answers the introspection methods and runs
//! `system.multicall`.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use itertools::Itertools;
use regex::bytes::Regex;
use tracing::error;

use crate::player;
use crate::player_config::PlayerConfig;
use crate::range::Span;
use crate::store::{DataStore, HistoryEntry, Item, Shared};
use crate::util::now_secs;
use crate::wire::{Fault, TypeToken, Value};

#[cfg(test)]
mod tests;

pub const API_MAJOR_VERSION: i64 = 1;
pub const API_MINOR_VERSION: i64 = 8;

/// Everything a method handler can reach.
#[derive(Clone)]
pub struct Context {
    pub store: Shared,
    pub conffile: Utf8PathBuf,
}

type MethodResult = Result<Value, Fault>;
type Handler = fn(&Context, Vec<Value>) -> MethodResult;

struct Method {
    handler: Handler,
    signatures: Vec<Vec<TypeToken>>,
    help: &'static str,
}

/// The explicit name-to-descriptor dispatch map.
pub struct Registry {
    methods: BTreeMap<&'static str, Method>,
    allow_introspection: bool,
}

/// Signatures and help for the `system.*` suite itself, which the
/// dispatcher answers directly.
const SYSTEM_METHODS: &[(&str, &[&[TypeToken]], &str)] = &[
    (
        "system.listMethods",
        &[&[TypeToken::Array]],
        "Returns an array of all available methods on this server.",
    ),
    (
        "system.methodSignature",
        &[&[TypeToken::Array, TypeToken::String]],
        "Returns an array of legal signatures for the named method. Each \
         signature is an array of type names; the first is the return type.",
    ),
    (
        "system.methodHelp",
        &[&[TypeToken::String, TypeToken::String]],
        "Returns a help string for the named method.",
    ),
    (
        "system.multicall",
        &[&[TypeToken::Array, TypeToken::Array]],
        "Processes an array of {methodName, params} structs and returns an \
         array of results: a single-item array on success, a fault struct \
         on failure. May not be nested.",
    ),
];

impl Registry {
    pub fn new() -> Self {
        let mut registry = Registry {
            methods: BTreeMap::new(),
            allow_introspection: true,
        };
        registry.install();
        registry
    }

    fn add(
        &mut self,
        name: &'static str,
        handler: Handler,
        signatures: &[&[TypeToken]],
        help: &'static str,
    ) {
        let signatures = signatures.iter().map(|sig| sig.to_vec()).collect();
        self.methods.insert(name, Method { handler, signatures, help });
    }

    pub fn dispatch(
        &self,
        ctx: &Context,
        method: &str,
        params: Vec<Value>,
        in_multicall: bool,
    ) -> MethodResult {
        match method {
            "system.listMethods" => self.list_methods(),
            "system.methodSignature" => self.method_signature(params),
            "system.methodHelp" => self.method_help(params),
            "system.multicall" => {
                if in_multicall {
                    return Err(Fault::request_refused(
                        "Recursive system.multicall forbidden",
                    ));
                }
                self.multicall(ctx, params)
            }
            _ => match self.methods.get(method) {
                Some(method) => (method.handler)(ctx, params),
                None => Err(Fault::no_such_method(method)),
            },
        }
    }

    fn introspection_check(&self) -> Result<(), Fault> {
        if self.allow_introspection {
            Ok(())
        } else {
            Err(Fault::introspection_disabled())
        }
    }

    fn list_methods(&self) -> MethodResult {
        self.introspection_check()?;
        let names = self
            .methods
            .keys()
            .copied()
            .chain(SYSTEM_METHODS.iter().map(|(name, ..)| *name))
            .sorted()
            .map(Value::from)
            .collect_vec();
        Ok(Value::Array(names))
    }

    fn signatures_for(&self, name: &str) -> Option<Vec<Vec<TypeToken>>> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.signatures.clone());
        }
        SYSTEM_METHODS
            .iter()
            .find(|(candidate, ..)| *candidate == name)
            .map(|(_, signatures, _)| signatures.iter().map(|sig| sig.to_vec()).collect())
    }

    fn method_signature(&self, params: Vec<Value>) -> MethodResult {
        self.introspection_check()?;
        let name = one_arg(params)?;
        let name = want_str(&name)?;
        let signatures = self
            .signatures_for(&name)
            .ok_or_else(|| Fault::no_such_method(&name))?;
        let rendered = signatures
            .into_iter()
            .map(|sig| {
                Value::Array(sig.iter().map(|token| Value::from(token.to_string())).collect())
            })
            .collect();
        Ok(Value::Array(rendered))
    }

    fn method_help(&self, params: Vec<Value>) -> MethodResult {
        self.introspection_check()?;
        let name = one_arg(params)?;
        let name = want_str(&name)?;
        if let Some(method) = self.methods.get(name.as_str()) {
            return Ok(Value::from(method.help));
        }
        SYSTEM_METHODS
            .iter()
            .find(|(candidate, ..)| *candidate == name)
            .map(|(.., help)| Value::from(*help))
            .ok_or_else(|| Fault::no_such_method(&name))
    }

    fn multicall(&self, ctx: &Context, params: Vec<Value>) -> MethodResult {
        let calls = one_arg(params)?;
        let Value::Array(calls) = calls else {
            return Err(Fault::type_error("multicall expects an array of structs"));
        };
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let outcome = self.multicall_element(ctx, call);
            results.push(match outcome {
                Ok(value) => Value::Array(vec![value]),
                Err(fault) => fault.to_struct(),
            });
        }
        Ok(Value::Array(results))
    }

    fn multicall_element(&self, ctx: &Context, call: Value) -> MethodResult {
        let Value::Struct(mut fields) = call else {
            return Err(Fault::invalid_argument(
                "multicall elements must be {methodName, params} structs",
            ));
        };
        let Some(Value::Str(name)) = fields.remove("methodName") else {
            return Err(Fault::invalid_argument(
                "multicall element is missing a methodName string",
            ));
        };
        let params = match fields.remove("params") {
            Some(Value::Array(params)) => params,
            Some(_) => {
                return Err(Fault::invalid_argument(
                    "multicall element params must be an array",
                ));
            }
            None => Vec::new(),
        };
        self.dispatch(ctx, &name, params, true)
    }

    fn install(&mut self) {
        use TypeToken::{Array, Base64, Boolean, Double, Int, String, Struct};

        // adding
        self.add(
            "insert",
            m_insert,
            &[&[Boolean, Array, Int]],
            "Inserts items at a given position in the queue. Items are \
             base64-encoded strings; use absolute pathnames for local files.",
        );
        self.add(
            "append",
            m_append,
            &[&[Boolean, Array]],
            "Adds items to the end of the queue.",
        );
        self.add(
            "prepend",
            m_prepend,
            &[&[Boolean, Array]],
            "Adds items to the beginning of the queue.",
        );
        self.add(
            "replace",
            m_replace,
            &[&[Boolean, Array]],
            "Replaces the contents of the queue with the given items, as one \
             atomic step.",
        );
        self.add(
            "replace_range",
            m_replace_range,
            &[&[Boolean, Array, Array]],
            "Replaces a slice of the queue with the given items, as one \
             atomic step.",
        );
        self.add(
            "interval_add",
            m_interval_add,
            &[&[Boolean, Int, Array]],
            "Inserts items into the queue at a regular interval: item i goes \
             to position i * interval.",
        );

        // removing
        self.add(
            "clear",
            m_clear,
            &[&[Boolean]],
            "Removes all items from the queue.",
        );
        self.add(
            "cut",
            m_cut,
            &[&[Boolean, Array]],
            "Removes all queued items that fall within the given range.",
        );
        self.add(
            "cut_list",
            m_cut_list,
            &[&[Boolean, Array]],
            "Removes the items at the given list of positions.",
        );
        self.add(
            "crop",
            m_crop,
            &[&[Boolean, Array]],
            "Removes all queued items that do not fall within the given range.",
        );
        self.add(
            "crop_list",
            m_crop_list,
            &[&[Boolean, Array]],
            "Removes all items except those at the given list of positions.",
        );
        self.add(
            "remove",
            m_remove,
            &[&[Boolean, Base64], &[Boolean, Base64, Array]],
            "Removes all items that match the given regular expression, \
             optionally limited to a range.",
        );
        self.add(
            "filter",
            m_filter,
            &[&[Boolean, Base64], &[Boolean, Base64, Array]],
            "Removes all items that don't match the given regular \
             expression, optionally limited to a range.",
        );

        // rearranging
        self.add(
            "move",
            m_move,
            &[&[Boolean, Array, Int]],
            "Moves a range of items to a new position within the queue.",
        );
        self.add(
            "move_list",
            m_move_list,
            &[&[Boolean, Array, Int]],
            "Moves the items at the given list of positions to a new \
             position.",
        );
        self.add(
            "swap",
            m_swap,
            &[&[Boolean, Array, Array]],
            "Swaps the items in one range with the items in another. The \
             ranges may not overlap.",
        );
        self.add(
            "shuffle",
            m_shuffle,
            &[&[Boolean], &[Boolean, Array]],
            "Rearranges the queue (or a range of it) into a random order.",
        );
        self.add(
            "sort",
            m_sort,
            &[&[Boolean], &[Boolean, Array]],
            "Arranges the queue (or a range of it) into sorted order.",
        );
        self.add(
            "reverse",
            m_reverse,
            &[&[Boolean], &[Boolean, Array]],
            "Reverses the order of the queue (or a range of it).",
        );
        self.add(
            "sub",
            m_sub,
            &[&[Boolean, Base64, Base64], &[Boolean, Base64, Base64, Array]],
            "Replaces the first occurrence of a regular expression within \
             each queue item. Items that become empty are removed.",
        );
        self.add(
            "sub_all",
            m_sub_all,
            &[&[Boolean, Base64, Base64], &[Boolean, Base64, Base64, Array]],
            "Replaces every occurrence of a regular expression within each \
             queue item. Items that become empty are removed.",
        );

        // query
        self.add(
            "list",
            m_list,
            &[&[Array], &[Array, Array]],
            "Lists the queue's contents, optionally limited to a range.",
        );
        self.add(
            "indexed_list",
            m_indexed_list,
            &[&[Struct], &[Struct, Array]],
            "Like list(), but returns a struct whose \"start\" member is the \
             position in the queue where the returned slice begins.",
        );
        self.add(
            "queue_length",
            m_queue_length,
            &[&[Int]],
            "Returns the number of items in the queue.",
        );
        self.add(
            "length",
            m_queue_length,
            &[&[Int]],
            "Returns the number of items in the queue.",
        );
        self.add(
            "current",
            m_current,
            &[&[Base64]],
            "Returns the name of the currently playing song, or an empty \
             string when nothing is playing.",
        );
        self.add(
            "history",
            m_history,
            &[&[Array], &[Array, Int]],
            "Returns recently played items as (song, started, finished) \
             triples. A positive limit returns at most that many entries; \
             zero or no argument returns them all.",
        );
        self.add(
            "get_history_limit",
            m_get_history_limit,
            &[&[Int]],
            "Gets the limit on the size of the history list kept in memory.",
        );
        self.add(
            "set_history_limit",
            m_set_history_limit,
            &[&[Boolean, Int]],
            "Sets the limit on the size of the history list. Negative values \
             are clamped to zero; excess entries are discarded.",
        );
        self.add(
            "is_paused",
            m_is_paused,
            &[&[Boolean]],
            "Tells you whether the current song is paused.",
        );
        self.add(
            "is_looping",
            m_is_looping,
            &[&[Boolean]],
            "Tells you whether loop mode is on.",
        );
        self.add(
            "is_queue_running",
            m_is_queue_running,
            &[&[Boolean]],
            "Tells you whether queue consumption is active.",
        );
        self.add(
            "current_time",
            m_current_time,
            &[&[Double]],
            "Returns the number of seconds the current song has been playing.",
        );
        self.add(
            "last_queue_update",
            m_last_queue_update,
            &[&[Double]],
            "Returns the time at which the queue was last modified, in \
             seconds since the epoch.",
        );
        self.add(
            "version",
            m_version,
            &[&[String]],
            "Returns the server's version string.",
        );
        self.add(
            "api_version",
            m_api_version,
            &[&[Array]],
            "Returns the API version as a [major, minor] pair of integers.",
        );
        self.add(
            "showconfig",
            m_showconfig,
            &[&[Base64]],
            "Returns a textual description of the filetype-to-player \
             configuration.",
        );
        self.add(
            "getconfig",
            m_getconfig,
            &[&[Array]],
            "Returns the filetype-to-player associations as an array of \
             (pattern, command) pairs.",
        );
        self.add("no_op", m_no_op, &[&[Boolean]], "Does nothing, successfully.");

        // playback control
        self.add(
            "pause",
            m_pause,
            &[&[Boolean]],
            "Pauses the currently playing song.",
        );
        self.add(
            "unpause",
            m_unpause,
            &[&[Boolean]],
            "Unpauses the current song.",
        );
        self.add(
            "toggle_pause",
            m_toggle_pause,
            &[&[Boolean]],
            "Pauses the current song if it is playing, and unpauses it if it \
             is paused.",
        );
        self.add(
            "skip",
            m_skip,
            &[&[Boolean]],
            "Skips the rest of the current song. Only has an effect when a \
             song is playing.",
        );
        self.add(
            "next",
            m_next,
            &[&[Boolean], &[Boolean, Int]],
            "Stops the current song and jumps ahead in the queue. Skipped \
             songs are recorded in the history as if they had been played.",
        );
        self.add(
            "previous",
            m_previous,
            &[&[Boolean], &[Boolean, Int]],
            "Stops the current song and backs up through the history, \
             returning songs to the head of the queue. With loop mode on, \
             the tail of the queue is used instead.",
        );
        self.add(
            "stop",
            m_stop,
            &[&[Boolean]],
            "Stops playing and halts the queue. The current song returns to \
             the head of the queue and is not recorded in the history.",
        );
        self.add(
            "putback",
            m_putback,
            &[&[Boolean]],
            "Places the currently playing song at the beginning of the queue.",
        );
        self.add(
            "halt_queue",
            m_halt_queue,
            &[&[Boolean]],
            "Stops any new songs from being played. Use run_queue() to \
             reverse this.",
        );
        self.add(
            "haltqueue",
            m_halt_queue,
            &[&[Boolean]],
            "Stops any new songs from being played. Use run_queue() to \
             reverse this.",
        );
        self.add(
            "run_queue",
            m_run_queue,
            &[&[Boolean]],
            "Allows new songs to be played again after halt_queue().",
        );
        self.add(
            "runqueue",
            m_run_queue,
            &[&[Boolean]],
            "Allows new songs to be played again after halt_queue().",
        );
        self.add(
            "set_loop_mode",
            m_set_loop_mode,
            &[&[Boolean, Boolean]],
            "Turns loop mode on or off. When on, finished songs return to \
             the end of the queue.",
        );
        self.add(
            "toggle_loop_mode",
            m_toggle_loop_mode,
            &[&[Boolean]],
            "Turns loop mode on if it is off, and off if it is on.",
        );
        self.add(
            "reconfigure",
            m_reconfigure,
            &[&[Boolean]],
            "Tells the server to reread its player configuration file. On \
             failure the previous configuration is kept.",
        );
        self.add(
            "die",
            m_die,
            &[&[Boolean]],
            "Tells the server to terminate itself.",
        );
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

//---- argument decoding ----//

fn no_args(params: Vec<Value>) -> Result<(), Fault> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(Fault::type_error(format!(
            "expected no arguments, got {}",
            params.len()
        )))
    }
}

fn one_arg(mut params: Vec<Value>) -> Result<Value, Fault> {
    if params.len() == 1 {
        Ok(params.remove(0))
    } else {
        Err(Fault::type_error(format!(
            "expected 1 argument, got {}",
            params.len()
        )))
    }
}

fn two_args(mut params: Vec<Value>) -> Result<(Value, Value), Fault> {
    if params.len() == 2 {
        let second = params.remove(1);
        Ok((params.remove(0), second))
    } else {
        Err(Fault::type_error(format!(
            "expected 2 arguments, got {}",
            params.len()
        )))
    }
}

fn want_int(value: &Value) -> Result<i64, Fault> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(Fault::type_error(format!(
            "expected an integer, got {}",
            other.type_name()
        ))),
    }
}

fn want_bool(value: &Value) -> Result<bool, Fault> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Int(n) => Ok(*n != 0),
        other => Err(Fault::type_error(format!(
            "expected a boolean, got {}",
            other.type_name()
        ))),
    }
}

fn want_str(value: &Value) -> Result<String, Fault> {
    match value {
        Value::Str(text) => Ok(text.clone()),
        other => Err(Fault::type_error(format!(
            "expected a string, got {}",
            other.type_name()
        ))),
    }
}

/// Queue items must arrive base64-wrapped; anything else cannot be enqueued.
fn want_items(value: Value) -> Result<Vec<Item>, Fault> {
    let Value::Array(items) = value else {
        return Err(Fault::type_error(format!(
            "expected an array of items, got {}",
            value.type_name()
        )));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(Fault::type_error(format!(
                "Objects of type '{}' cannot be inserted.",
                other.type_name()
            ))),
        })
        .collect()
}

/// Patterns and replacement texts may be base64-wrapped or plain strings.
fn want_bytes(value: Value) -> Result<Vec<u8>, Fault> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::Str(text) => Ok(text.into_bytes()),
        other => Err(Fault::type_error(format!(
            "expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn want_indices(value: &Value) -> Result<Vec<i64>, Fault> {
    let Value::Array(values) = value else {
        return Err(Fault::type_error(format!(
            "expected an array of integers, got {}",
            value.type_name()
        )));
    };
    values
        .iter()
        .map(|v| match v {
            Value::Int(n) => Ok(*n),
            other => Err(Fault::invalid_argument(format!(
                "expected an integer, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn want_span(value: &Value) -> Result<Span, Fault> {
    Span::from_ints(&want_indices(value)?)
}

/// The trailing optional range argument most methods take.
fn trailing_span(params: &[Value], at: usize) -> Result<Span, Fault> {
    match params.len() {
        n if n == at => Ok(Span::All),
        n if n == at + 1 => want_span(&params[at]),
        n => Err(Fault::type_error(format!(
            "expected at most {} argument(s), got {n}",
            at + 1
        ))),
    }
}

/// The optional count argument of next() and previous().
fn optional_count(params: &[Value]) -> Result<usize, Fault> {
    let count = match params {
        [] => 1,
        [count] => want_int(count)?,
        _ => return Err(Fault::type_error("expected at most 1 argument")),
    };
    Ok(count.max(0) as usize)
}

fn compile_pattern(raw: Vec<u8>) -> Result<Regex, Fault> {
    let text = String::from_utf8(raw)
        .map_err(|_| Fault::invalid_utf8("regex patterns must be valid UTF-8"))?;
    Regex::new(&text)
        .map_err(|e| Fault::invalid_argument(format!("bad regular expression: {e}")))
}

fn ok() -> MethodResult {
    Ok(Value::Bool(true))
}

fn history_value(entries: Vec<HistoryEntry>) -> Value {
    Value::Array(
        entries
            .into_iter()
            .map(|entry| {
                Value::Array(vec![
                    Value::Bytes(entry.item),
                    Value::Double(entry.started),
                    Value::Double(entry.finished),
                ])
            })
            .collect(),
    )
}

//---- adding ----//

fn m_insert(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let (items, position) = two_args(params)?;
    let position = want_int(&position)?;
    let items = want_items(items)?;
    ctx.store.lock().insert_items(items, position);
    ok()
}

fn m_append(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let items = one_arg(params)?;
    let items = want_items(items)?;
    ctx.store.lock().append_items(items);
    ok()
}

fn m_prepend(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let items = one_arg(params)?;
    let items = want_items(items)?;
    ctx.store.lock().insert_items(items, 0);
    ok()
}

fn m_replace(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let items = one_arg(params)?;
    let items = want_items(items)?;
    ctx.store.lock().replace_all(items);
    ok()
}

fn m_replace_range(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let (range, items) = two_args(params)?;
    let span = want_span(&range)?;
    let items = want_items(items)?;
    ctx.store.lock().replace_span(span, items);
    ok()
}

fn m_interval_add(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let (interval, items) = two_args(params)?;
    let interval = want_int(&interval)?;
    let items = want_items(items)?;
    ctx.store.lock().interval_add(interval, items);
    ok()
}

//---- removing ----//

fn m_clear(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    ctx.store.lock().clear();
    ok()
}

fn m_cut(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let range = one_arg(params)?;
    let span = want_span(&range)?;
    ctx.store.lock().cut_span(span);
    ok()
}

fn m_cut_list(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let indices = one_arg(params)?;
    let indices = want_indices(&indices)?;
    ctx.store.lock().cut_indices(&indices)?;
    ok()
}

fn m_crop(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let range = one_arg(params)?;
    let span = want_span(&range)?;
    ctx.store.lock().crop_span(span);
    ok()
}

fn m_crop_list(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let indices = one_arg(params)?;
    let indices = want_indices(&indices)?;
    ctx.store.lock().crop_indices(&indices)?;
    ok()
}

fn m_remove(ctx: &Context, mut params: Vec<Value>) -> MethodResult {
    if params.is_empty() {
        return Err(Fault::type_error("expected a regular expression"));
    }
    let span = trailing_span(&params, 1)?;
    let pattern = compile_pattern(want_bytes(params.remove(0))?)?;
    ctx.store.lock().retain_matching(&pattern, span, false);
    ok()
}

fn m_filter(ctx: &Context, mut params: Vec<Value>) -> MethodResult {
    if params.is_empty() {
        return Err(Fault::type_error("expected a regular expression"));
    }
    let span = trailing_span(&params, 1)?;
    let pattern = compile_pattern(want_bytes(params.remove(0))?)?;
    ctx.store.lock().retain_matching(&pattern, span, true);
    ok()
}

//---- rearranging ----//

fn m_move(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let (range, dest) = two_args(params)?;
    let span = want_span(&range)?;
    let dest = want_int(&dest)?;
    ctx.store.lock().move_span(span, dest);
    ok()
}

fn m_move_list(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let (indices, dest) = two_args(params)?;
    let indices = want_indices(&indices)?;
    let dest = want_int(&dest)?;
    ctx.store.lock().move_indices(&indices, dest)?;
    ok()
}

fn m_swap(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let (range_a, range_b) = two_args(params)?;
    let a = want_span(&range_a)?;
    let b = want_span(&range_b)?;
    ctx.store.lock().swap_spans(a, b)?;
    ok()
}

fn m_shuffle(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let span = trailing_span(&params, 0)?;
    ctx.store.lock().shuffle_span(span);
    ok()
}

fn m_sort(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let span = trailing_span(&params, 0)?;
    ctx.store.lock().sort_span(span);
    ok()
}

fn m_reverse(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let span = trailing_span(&params, 0)?;
    ctx.store.lock().reverse_span(span);
    ok()
}

fn substitute(ctx: &Context, mut params: Vec<Value>, global: bool) -> MethodResult {
    if params.len() < 2 {
        return Err(Fault::type_error(
            "expected a pattern and a replacement string",
        ));
    }
    let span = trailing_span(&params, 2)?;
    let replacement = want_bytes(params.remove(1))?;
    let pattern = compile_pattern(want_bytes(params.remove(0))?)?;
    ctx.store
        .lock()
        .substitute(&pattern, &replacement, span, global);
    ok()
}

fn m_sub(ctx: &Context, params: Vec<Value>) -> MethodResult {
    substitute(ctx, params, false)
}

fn m_sub_all(ctx: &Context, params: Vec<Value>) -> MethodResult {
    substitute(ctx, params, true)
}

//---- query ----//

fn m_list(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let span = trailing_span(&params, 0)?;
    let store = ctx.store.lock();
    let (start, end) = span.resolve(store.queue.len());
    Ok(Value::Array(
        store.queue[start..end]
            .iter()
            .map(|item| Value::Bytes(item.clone()))
            .collect(),
    ))
}

fn m_indexed_list(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let span = trailing_span(&params, 0)?;
    let store = ctx.store.lock();
    let (start, end) = span.resolve(store.queue.len());
    let items = store.queue[start..end]
        .iter()
        .map(|item| Value::Bytes(item.clone()))
        .collect();
    let mut fields = BTreeMap::new();
    fields.insert(
        "start".to_owned(),
        Value::Int(span.reported_start(store.queue.len()) as i64),
    );
    fields.insert("list".to_owned(), Value::Array(items));
    Ok(Value::Struct(fields))
}

fn m_queue_length(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Int(ctx.store.lock().queue.len() as i64))
}

fn m_current(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Bytes(ctx.store.lock().current.clone()))
}

fn m_history(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let limit = match params.as_slice() {
        [] => 0,
        [limit] => want_int(limit)?.max(0) as usize,
        _ => return Err(Fault::type_error("expected at most 1 argument")),
    };
    Ok(history_value(ctx.store.lock().history_tail(limit)))
}

fn m_get_history_limit(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Int(ctx.store.lock().max_history as i64))
}

fn m_set_history_limit(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let limit = one_arg(params)?;
    let limit = want_int(&limit)?;
    ctx.store.lock().set_history_limit(limit);
    ok()
}

fn m_is_paused(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Bool(ctx.store.lock().paused))
}

fn m_is_looping(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Bool(ctx.store.lock().loop_mode))
}

fn m_is_queue_running(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Bool(ctx.store.lock().queue_running))
}

fn m_current_time(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Double(ctx.store.lock().current_time(now_secs())))
}

fn m_last_queue_update(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Double(ctx.store.lock().last_queue_update))
}

fn m_version(_ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::from(env!("CARGO_PKG_VERSION")))
}

fn m_api_version(_ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Array(vec![
        Value::Int(API_MAJOR_VERSION),
        Value::Int(API_MINOR_VERSION),
    ]))
}

fn m_showconfig(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    Ok(Value::Bytes(ctx.store.lock().config.render().into_bytes()))
}

fn m_getconfig(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    let store = ctx.store.lock();
    Ok(Value::Array(
        store
            .config
            .entries()
            .iter()
            .map(|entry| {
                Value::Array(vec![
                    Value::Bytes(entry.pattern.as_str().as_bytes().to_vec()),
                    Value::Bytes(entry.argv.iter().join(" ").into_bytes()),
                ])
            })
            .collect(),
    ))
}

fn m_no_op(_ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    ok()
}

//---- playback control ----//

fn m_pause(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    player::pause(&ctx.store)?;
    ok()
}

fn m_unpause(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    player::unpause(&ctx.store)?;
    ok()
}

fn m_toggle_pause(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    let paused = ctx.store.lock().paused;
    if paused {
        player::unpause(&ctx.store)?;
    } else {
        player::pause(&ctx.store)?;
    }
    ok()
}

fn m_skip(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    player::skip(&ctx.store)?;
    ok()
}

/// Shared core of stop(), next() and previous(): the current song goes back
/// to the head of the queue, consumption halts, and the finish transition of
/// the in-flight song is suppressed. The caller delivers the skip signals
/// after the lock is released.
fn stop_under_lock(store: &mut DataStore) {
    store.putback();
    store.queue_running = false;
    if !store.current.is_empty() {
        store.ignore_finish = true;
    }
}

fn m_stop(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    {
        let mut store = ctx.store.lock();
        stop_under_lock(&mut store);
    }
    player::skip(&ctx.store)?;
    ok()
}

fn m_next(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let count = optional_count(&params)?;
    {
        let mut store = ctx.store.lock();
        let was_running = store.queue_running;
        stop_under_lock(&mut store);
        store.advance(count, now_secs());
        store.queue_running = was_running;
    }
    player::skip(&ctx.store)?;
    ok()
}

fn m_previous(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let count = optional_count(&params)?;
    {
        let mut store = ctx.store.lock();
        let was_running = store.queue_running;
        stop_under_lock(&mut store);
        store.retreat(count);
        store.queue_running = was_running;
    }
    player::skip(&ctx.store)?;
    ok()
}

fn m_putback(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    ctx.store.lock().putback();
    ok()
}

fn m_halt_queue(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    ctx.store.lock().queue_running = false;
    ok()
}

fn m_run_queue(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    ctx.store.lock().queue_running = true;
    ok()
}

fn m_set_loop_mode(ctx: &Context, params: Vec<Value>) -> MethodResult {
    let value = one_arg(params)?;
    let value = want_bool(&value)?;
    ctx.store.lock().loop_mode = value;
    ok()
}

fn m_toggle_loop_mode(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    let mut store = ctx.store.lock();
    store.loop_mode = !store.loop_mode;
    ok()
}

fn m_reconfigure(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    match PlayerConfig::load(&ctx.conffile) {
        Ok(config) => {
            ctx.store.lock().config = config;
            ok()
        }
        Err(e) => {
            error!(
                "The configuration file could not be reloaded! {}: {e:#}",
                ctx.conffile
            );
            Err(Fault::internal(format!(
                "could not reload configuration: {e:#}"
            )))
        }
    }
}

fn m_die(ctx: &Context, params: Vec<Value>) -> MethodResult {
    no_args(params)?;
    player::die(&ctx.store)?;
    ok()
}
