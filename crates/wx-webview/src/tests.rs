use crate::AutoLoadKind;
use crate::ErrorKind;
use crate::HeadlessBackend;
use crate::LoadState;
use crate::NavigationType;
use crate::PendingResult;
use crate::StylesheetInjection;
use crate::WebView;
use crate::WebViewConfig;
use crate::WebViewError;
use crate::WebViewEvent;
use crate::WebViewEventKind;
use futures::executor::block_on;
use serde_json::Value;
use serde_json::json;
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;

const EMPTY_HTML: &str = "<html><head><title>Empty</title></head><body></body></html>";

const SECOND_PAGE_HTML: &str =
    "<html><head><title>Second</title></head><body><p>unrelated document</p></body></html>";

const JAVASCRIPT_CALLS_HTML: &str = r#"<html>
<head><title>Blank</title></head>
<body>
<script>
function getNumberFloat() { return 3.14; }
function getTruth() { return true; }
function getFalse() { return false; }
function getString() { return 'string result from webview JS function'; }
function getArray() { return [1.5, 2.5, 3.5]; }
function getObject() { return { prop: 'test', name: 'object-test', values: [42, 3.14] }; }
function testPromiseResolve() {
  return new Promise(function (resolve) {
    setTimeout(function () { resolve(42); }, 200);
  });
}
function testPromiseReject() {
  return new Promise(function (_resolve, reject) {
    setTimeout(function () { reject(new Error('The Cake is a Lie')); }, 200);
  });
}
function setupEventListener() {
  window.wxBridge.on('tns-message', function (data) {
    window.lastMessage = data;
    window.wxBridge.emit('web-message', data);
  });
  return true;
}
</script>
</body>
</html>"#;

fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap_or_else(|error| panic!("tempdir: {error}"));
    for (name, contents) in [
        ("empty.html", EMPTY_HTML),
        ("second-page.html", SECOND_PAGE_HTML),
        ("javascript-calls.html", JAVASCRIPT_CALLS_HTML),
        ("local-javascript.js", "function getNumber() { return 42; }"),
        ("extra-javascript.js", "function getExtra() { return 'extra'; }"),
        (
            "local-stylesheet.css",
            ".red { color: rgb(0, 128, 0); }",
        ),
    ] {
        fs::write(dir.path().join(name), contents)
            .unwrap_or_else(|error| panic!("write {name}: {error}"));
    }
    dir
}

fn web_view(dir: &TempDir) -> WebView<HeadlessBackend> {
    web_view_with(dir, StylesheetInjection::Inline)
}

fn web_view_with(dir: &TempDir, injection: StylesheetInjection) -> WebView<HeadlessBackend> {
    let config = WebViewConfig::default()
        .with_app_root(dir.path())
        .with_stylesheet_injection(injection);
    WebView::headless(config).unwrap_or_else(|error| panic!("{error}"))
}

fn load(view: &mut WebView<HeadlessBackend>, src: &str) {
    view.set_src(src)
        .unwrap_or_else(|error| panic!("set_src {src}: {error}"));
    assert_eq!(view.load_state(), &LoadState::Loaded, "{src} did not load");
}

fn resolved(result: PendingResult) -> Value {
    match block_on(result) {
        Ok(value) => value,
        Err(error) => panic!("expected a value, got {error}"),
    }
}

fn rejected(result: PendingResult) -> WebViewError {
    match block_on(result) {
        Err(error) => error,
        Ok(value) => panic!("expected a rejection, got {value}"),
    }
}

fn record(view: &WebView<HeadlessBackend>, kind: WebViewEventKind) -> Rc<RefCell<Vec<WebViewEvent>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    view.on(kind, move |event| sink.borrow_mut().push(event.clone()))
        .detach();
    seen
}

#[test]
fn executes_expressions_and_reports_exceptions() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    assert_eq!(resolved(view.execute_javascript("1+1")), json!(2));

    let error = rejected(view.execute_javascript("(function(){throw new Error('x')})()"));
    assert!(error.is(ErrorKind::ScriptEvaluation));
    assert!(error.message.contains('x'), "message was {}", error.message);
    assert_eq!(view.pending_requests(), 0);
}

#[test]
fn structured_values_round_trip_with_and_without_stringify() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/javascript-calls.html");

    let expected = json!({ "prop": "test", "name": "object-test", "values": [42, 3.14] });
    assert_eq!(resolved(view.execute_javascript_with("getObject()", true)), expected);
    assert_eq!(resolved(view.execute_javascript_with("getObject()", false)), expected);

    assert_eq!(resolved(view.execute_javascript("getNumberFloat()")), json!(3.14));
    assert_eq!(resolved(view.execute_javascript("getTruth()")), json!(true));
    assert_eq!(resolved(view.execute_javascript("getFalse()")), json!(false));
    assert_eq!(
        resolved(view.execute_javascript("getString()")),
        json!("string result from webview JS function")
    );
    assert_eq!(
        resolved(view.execute_javascript_with("getArray()", false)),
        json!([1.5, 2.5, 3.5])
    );
}

#[test]
fn execute_promise_resolves_after_delay() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/javascript-calls.html");

    assert_eq!(resolved(view.execute_promise("testPromiseResolve()")), json!(42));
    assert_eq!(view.pending_requests(), 0);
}

#[test]
fn execute_promise_rejections_carry_the_page_reason() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/javascript-calls.html");

    let error = rejected(view.execute_promise("testPromiseReject()"));
    assert!(error.is(ErrorKind::PromiseRejected));
    assert_eq!(error.message, "The Cake is a Lie");

    let error = rejected(view.execute_promise("Promise.reject('X')"));
    assert!(error.is(ErrorKind::PromiseRejected));
    assert_eq!(error.message, "X");
}

#[test]
fn promise_settlements_never_surface_as_web_messages() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/javascript-calls.html");
    let messages = record(&view, WebViewEventKind::WebMessage);

    assert_eq!(resolved(view.execute_promise("Promise.resolve('done')")), json!("done"));
    assert!(messages.borrow().is_empty());
}

#[test]
fn auto_loaded_script_survives_navigation() {
    let dir = fixture();
    let mut view = web_view(&dir);
    view.auto_load_javascript_file("local-javascript.js", "~/local-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));

    load(&mut view, "~/empty.html");
    assert_eq!(resolved(view.execute_javascript("getNumber()")), json!(42));

    load(&mut view, "~/second-page.html");
    assert_eq!(resolved(view.title()), json!("Second"));
    assert_eq!(resolved(view.execute_javascript("getNumber()")), json!(42));

    view.go_back();
    assert_eq!(view.load_state(), &LoadState::Loaded);
    assert_eq!(resolved(view.title()), json!("Empty"));
    assert_eq!(resolved(view.execute_javascript("getNumber()")), json!(42));
}

#[test]
fn auto_load_registered_after_load_applies_now_and_removal_stops_it() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    view.auto_load_javascript_file("local-javascript.js", "~/local-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(resolved(view.execute_javascript("getNumber()")), json!(42));

    assert!(view.remove_auto_load_javascript_file("local-javascript.js"));
    assert!(!view.remove_auto_load_javascript_file("local-javascript.js"));
    // Already injected content stays in the current document.
    assert_eq!(resolved(view.execute_javascript("typeof getNumber")), json!("function"));

    load(&mut view, "~/second-page.html");
    assert_eq!(resolved(view.execute_javascript("typeof getNumber")), json!("undefined"));
}

#[test]
fn one_shot_injection_does_not_follow_navigation() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    let injected = view
        .load_javascript_file("local-javascript.js", "~/local-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(resolved(injected), json!(null));
    assert_eq!(resolved(view.execute_javascript("getNumber()")), json!(42));

    load(&mut view, "~/second-page.html");
    assert_eq!(resolved(view.execute_javascript("typeof getNumber")), json!("undefined"));
}

#[test]
fn batch_loaders_inject_in_order() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    let results = view
        .load_javascript_files(&[
            ("local-javascript.js", "~/local-javascript.js"),
            ("extra-javascript.js", "~/extra-javascript.js"),
        ])
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(results.len(), 2);
    for result in results {
        assert_eq!(resolved(result), json!(null));
    }
    assert_eq!(
        resolved(view.execute_javascript("getNumber() + ':' + getExtra()")),
        json!("42:extra")
    );
    assert_eq!(
        resolved(view.execute_javascript(
            "document.getElementsByTagName('script').map(function (s) { return s.getAttribute('data-wx-resource'); })"
        )),
        json!(["local-javascript.js", "extra-javascript.js"])
    );
}

#[test]
fn auto_executed_code_runs_in_registration_order() {
    let dir = fixture();
    let mut view = web_view(&dir);
    view.auto_execute_javascript("first", "window.order = ['first'];")
        .unwrap_or_else(|error| panic!("{error}"));
    view.auto_execute_javascript("second", "window.order.push('second');")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(view.auto_loads(AutoLoadKind::JavaScriptCode), vec!["first", "second"]);

    load(&mut view, "~/empty.html");
    assert_eq!(resolved(view.execute_javascript("window.order")), json!(["first", "second"]));

    assert!(view.remove_auto_execute_javascript("second"));
    load(&mut view, "~/second-page.html");
    assert_eq!(resolved(view.execute_javascript("window.order")), json!(["first"]));
}

#[test]
fn host_and_page_exchange_messages() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/javascript-calls.html");
    let messages = record(&view, WebViewEventKind::WebMessage);

    assert_eq!(resolved(view.execute_javascript("setupEventListener()")), json!(true));

    let emitted = view
        .emit_to_web_view("tns-message", &json!({ "a": 1 }))
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(resolved(emitted), json!(1));
    assert_eq!(resolved(view.execute_javascript("window.lastMessage")), json!({ "a": 1 }));

    assert_eq!(
        resolved(view.execute_javascript("window.wxBridge.emit('web-message', { huba: 'hop' })")),
        json!(true)
    );

    assert_eq!(
        messages.borrow().as_slice(),
        &[
            WebViewEvent::WebMessage {
                name: "web-message".to_owned(),
                data: json!({ "a": 1 }),
            },
            WebViewEvent::WebMessage {
                name: "web-message".to_owned(),
                data: json!({ "huba": "hop" }),
            },
        ]
    );
}

#[test]
fn emit_without_page_listeners_reaches_nobody() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    let emitted = view
        .emit_to_web_view("nobody-listens", &json!([1, 2, 3]))
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(resolved(emitted), json!(0));
    assert!(view.emit_to_web_view("", &json!(null)).is_err());
}

#[test]
fn malformed_page_messages_are_dropped() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");
    let messages = record(&view, WebViewEventKind::WebMessage);

    assert_eq!(
        resolved(view.execute_javascript("window.__wxHostTransport.post('not json'); 'still fine'")),
        json!("still fine")
    );
    assert!(messages.borrow().is_empty());
}

#[test]
fn unregistering_unknown_resources_is_a_no_op() {
    let dir = fixture();
    let mut view = web_view(&dir);
    view.unregister_local_resource("never-registered.js");
    assert!(view.registered_local_resource("never-registered.js").is_none());

    view.register_local_resource("script.js", "~/local-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(
        view.registered_local_resource("script.js"),
        Some(dir.path().join("local-javascript.js"))
    );

    view.register_local_resource("script.js", "~/extra-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));
    let content = view
        .registry()
        .resolve_text("script.js")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(content, "function getExtra() { return 'extra'; }");

    view.unregister_local_resource("script.js");
    assert!(view.registered_local_resource("script.js").is_none());
}

#[test]
fn documents_load_from_the_virtual_scheme() {
    let dir = fixture();
    let mut view = web_view(&dir);
    view.register_local_resource("empty.html", "~/empty.html")
        .unwrap_or_else(|error| panic!("{error}"));

    load(&mut view, "x-local://empty.html");
    assert_eq!(view.src(), Some("x-local://empty.html"));
    assert_eq!(view.url(), Some("x-local://empty.html"));
    assert_eq!(resolved(view.title()), json!("Empty"));
}

#[test]
fn requests_issued_before_load_wait_for_it() {
    let dir = fixture();
    let mut view = web_view(&dir);
    assert_eq!(view.load_state(), &LoadState::Idle);

    let mut early = view.execute_javascript("1+1");
    let mut early_promise = view.execute_promise("Promise.resolve(7)");
    assert!(early.try_take().is_none());
    assert!(early_promise.try_take().is_none());
    assert_eq!(view.queued_requests(), 2);

    load(&mut view, "~/empty.html");
    assert_eq!(view.queued_requests(), 0);
    assert_eq!(early.try_take(), Some(Ok(json!(2))));
    assert_eq!(early_promise.try_take(), Some(Ok(json!(7))));
}

#[test]
fn failed_load_rejects_queued_and_new_requests() {
    let dir = fixture();
    let mut view = web_view(&dir);
    let finished = record(&view, WebViewEventKind::LoadFinished);

    let queued = view.execute_javascript("1+1");
    view.set_src("~/missing.html")
        .unwrap_or_else(|error| panic!("{error}"));

    assert!(matches!(view.load_state(), LoadState::Failed(_)));
    assert!(rejected(queued).is(ErrorKind::ChannelUnavailable));
    assert!(rejected(view.execute_javascript("1+1")).is(ErrorKind::ChannelUnavailable));
    match finished.borrow().as_slice() {
        [WebViewEvent::LoadFinished { error: Some(_), navigation_type: NavigationType::Other, .. }] => {}
        other => panic!("unexpected load events: {other:?}"),
    }

    load(&mut view, "~/empty.html");
    assert_eq!(resolved(view.execute_javascript("1+1")), json!(2));
}

#[test]
fn load_events_bracket_each_navigation() {
    let dir = fixture();
    let mut view = web_view(&dir);
    let log = Rc::new(RefCell::new(Vec::new()));

    let started_log = Rc::clone(&log);
    let started = view.on(WebViewEventKind::LoadStarted, move |event| {
        if let WebViewEvent::LoadStarted { navigation_type, .. } = event {
            started_log
                .borrow_mut()
                .push(format!("started:{}", navigation_type.as_str()));
        }
    });
    let finished_log = Rc::clone(&log);
    let finished = view.on(WebViewEventKind::LoadFinished, move |event| {
        if let WebViewEvent::LoadFinished { url, error: None, .. } = event {
            let page = url.rsplit('/').next().unwrap_or_default().to_owned();
            finished_log.borrow_mut().push(format!("finished:{page}"));
        }
    });

    load(&mut view, "~/empty.html");
    load(&mut view, "~/second-page.html");
    view.reload();
    assert_eq!(
        log.borrow().as_slice(),
        &[
            "started:other",
            "finished:empty.html",
            "started:other",
            "finished:second-page.html",
            "started:reload",
            "finished:second-page.html",
        ]
    );

    drop(started);
    finished.unsubscribe();
    assert_eq!(view.listener_count(WebViewEventKind::LoadStarted), 0);
    assert_eq!(view.listener_count(WebViewEventKind::LoadFinished), 0);
    load(&mut view, "~/empty.html");
    assert_eq!(log.borrow().len(), 6);
}

#[test]
fn history_navigation_reapplies_auto_loads() {
    let dir = fixture();
    let mut view = web_view(&dir);
    assert!(!view.can_go_back());

    load(&mut view, "~/empty.html");
    load(&mut view, "~/second-page.html");
    assert!(view.can_go_back());
    assert!(!view.can_go_forward());

    view.auto_execute_javascript("marker", "window.marker = document.title;")
        .unwrap_or_else(|error| panic!("{error}"));
    view.go_back();
    assert_eq!(resolved(view.execute_javascript("window.marker")), json!("Empty"));
    assert!(view.can_go_forward());

    view.go_forward();
    assert_eq!(resolved(view.execute_javascript("window.marker")), json!("Second"));
}

#[test]
fn stylesheets_inline_by_default() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    let injected = view
        .load_stylesheet_file("local-stylesheet.css", "~/local-stylesheet.css")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(resolved(injected), json!(null));
    assert_eq!(
        resolved(view.execute_javascript(
            "document.styleSheets.length + '|' + document.styleSheets[0].cssText"
        )),
        json!("1|.red { color: rgb(0, 128, 0); }")
    );
}

#[test]
fn linked_stylesheets_resolve_through_the_virtual_scheme() {
    let dir = fixture();
    let mut view = web_view_with(&dir, StylesheetInjection::Link);
    view.auto_load_stylesheet_file("local-stylesheet.css", "~/local-stylesheet.css")
        .unwrap_or_else(|error| panic!("{error}"));

    load(&mut view, "~/empty.html");
    assert_eq!(
        resolved(view.execute_javascript(
            "document.styleSheets.length + '|' + document.styleSheets[0].href"
        )),
        json!("1|x-local://local-stylesheet.css")
    );

    assert!(view.remove_auto_load_stylesheet_file("local-stylesheet.css"));
    load(&mut view, "~/second-page.html");
    assert_eq!(resolved(view.execute_javascript("document.styleSheets.length")), json!(0));
}

#[test]
fn loading_unknown_files_fails_synchronously() {
    let dir = fixture();
    let mut view = web_view(&dir);
    load(&mut view, "~/empty.html");

    let error = match view.load_javascript_file("missing.js", "~/missing.js") {
        Err(error) => error,
        Ok(_) => panic!("missing file was injected"),
    };
    assert!(error.is(ErrorKind::Io));
    assert_eq!(view.registered_local_resource("missing.js"), None);
    assert!(view.auto_load_stylesheet_file("", "~/local-stylesheet.css").is_err());
    assert!(view.auto_execute_javascript(" ", "1").is_err());
}

#[test]
fn failed_reload_of_a_name_keeps_its_working_registration() {
    let dir = fixture();
    let mut view = web_view(&dir);
    view.auto_load_javascript_file("local-javascript.js", "~/local-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));
    load(&mut view, "~/empty.html");

    let error = match view.load_javascript_file("local-javascript.js", "~/missing.js") {
        Err(error) => error,
        Ok(_) => panic!("missing file was injected"),
    };
    assert!(error.is(ErrorKind::Io));
    assert!(view.auto_load_javascript_file("local-javascript.js", "~/missing.js").is_err());
    assert!(view.load_stylesheet_file("local-javascript.js", "~/missing.css").is_err());
    assert_eq!(
        view.registered_local_resource("local-javascript.js"),
        Some(dir.path().join("local-javascript.js"))
    );

    load(&mut view, "~/second-page.html");
    assert_eq!(resolved(view.execute_javascript("getNumber()")), json!(42));
}

#[test]
fn padded_names_are_trimmed_everywhere() {
    let dir = fixture();
    let mut view = web_view(&dir);
    view.auto_load_javascript_file("  local-javascript.js ", "~/local-javascript.js")
        .unwrap_or_else(|error| panic!("{error}"));
    view.auto_execute_javascript(" marker ", "var marker = 1;")
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(
        view.auto_loads(AutoLoadKind::JavaScriptFile),
        vec!["local-javascript.js".to_owned()]
    );
    assert_eq!(view.auto_loads(AutoLoadKind::JavaScriptCode), vec!["marker".to_owned()]);

    load(&mut view, "~/empty.html");
    assert_eq!(resolved(view.execute_javascript("getNumber() + marker")), json!(43));

    assert!(view.remove_auto_load_javascript_file(" local-javascript.js"));
    assert!(view.remove_auto_execute_javascript("marker "));
    assert!(view.auto_loads(AutoLoadKind::JavaScriptFile).is_empty());
}

#[test]
fn non_ascii_linked_stylesheets_are_served() {
    let dir = fixture();
    let mut view = web_view_with(&dir, StylesheetInjection::Link);
    view.auto_load_stylesheet_file("thèmes//über.css", "~/local-stylesheet.css")
        .unwrap_or_else(|error| panic!("{error}"));

    load(&mut view, "~/empty.html");
    assert_eq!(
        resolved(view.execute_javascript(
            "document.styleSheets.length + '|' + document.styleSheets[0].cssText"
        )),
        json!("1|.red { color: rgb(0, 128, 0); }")
    );
}

#[test]
fn invalid_sources_are_refused() {
    let dir = fixture();
    let mut view = web_view(&dir);
    assert!(view.set_src("").is_err());
    assert!(view.set_src("not a url").is_err());
    assert_eq!(view.load_state(), &LoadState::Idle);
    assert!(view.src().is_none());
}

#[test]
fn dropped_container_abandons_pending_requests() {
    let dir = fixture();
    let mut view = web_view(&dir);
    let queued = view.execute_javascript("1+1");
    drop(view);
    assert!(rejected(queued).is(ErrorKind::ChannelUnavailable));
}
