//! End-to-end scenarios: the full bridge between a DAP test client and an
//! in-process mock browser.

mod mock_browser;

use anyhow::anyhow;
use mock_browser::{DapTestClient, MockBrowser, MockOptions, MockTab, dap_pipes};
use serde_json::{Value, json};
use tokio::task::LocalSet;

fn one_tab() -> Vec<MockTab> {
    vec![MockTab {
        url: "https://app.test/index.html".to_string(),
        title: "App".to_string(),
    }]
}

fn frame_at(source_actor: &str, line: u32, name: &str) -> Value {
    json!({
        "actor": "server1.frame1",
        "displayName": name,
        "type": "call",
        "where": {"actor": source_actor, "line": line, "column": 0},
        "environment": {
            "bindings": {
                "arguments": [],
                "variables": {"i": {"value": 2}},
            },
        },
    })
}

fn source_resource(actor: &str, url: Option<&str>, introduction: &str) -> Value {
    let mut source = json!({"actor": actor, "introductionType": introduction});
    if let Some(url) = url {
        source["url"] = json!(url);
    }
    json!([{"resourceType": "source", "source": source}])
}

async fn start_session(
    options: MockOptions,
    extra_config: Value,
) -> anyhow::Result<(DapTestClient, MockBrowser)> {
    let browser = MockBrowser::start(options).await?;
    let (mut client, adapter_input, adapter_output) = dap_pipes();
    tokio::task::spawn_local(async move {
        let _ = foxdap::session::serve(adapter_input, adapter_output).await;
    });

    let seq = client
        .request("initialize", json!({"adapterID": "foxdap"}))
        .await?;
    let response = client.wait_response(seq).await?;
    assert_eq!(response["success"], true);
    client.wait_event("initialized").await?;

    let mut arguments = json!({
        "request": "attach",
        "port": browser.port,
        "terminate": false,
    });
    if let (Value::Object(args), Value::Object(extra)) = (&mut arguments, extra_config) {
        args.extend(extra);
    }
    let seq = client.request("attach", arguments).await?;
    let response = client.wait_response(seq).await?;
    assert_eq!(response["success"], true, "attach failed: {response}");

    Ok((client, browser))
}

async fn expect_thread_started(client: &mut DapTestClient) -> anyhow::Result<i64> {
    let event = client.wait_event("thread").await?;
    assert_eq!(event["body"]["reason"], "started");
    let started = client.wait_event("threadStarted").await?;
    let id = started["body"]["id"]
        .as_i64()
        .ok_or_else(|| anyhow!("threadStarted without id"))?;
    assert_eq!(event["body"]["threadId"], json!(id));
    Ok(id)
}

#[tokio::test]
async fn target_lifecycle() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let (mut client, browser) = start_session(
                MockOptions {
                    tabs: one_tab(),
                    ..MockOptions::default()
                },
                json!({}),
            )
            .await?;

            let thread_id = expect_thread_started(&mut client).await?;

            // Discovery cleared the connection prompt so re-attaches will not
            // hang on a browser dialog.
            assert_eq!(
                browser.state.borrow().prefs_set,
                vec![("devtools.debugger.prompt-connection".to_string(), false)]
            );

            browser.resources(
                0,
                source_resource(
                    "server1.src1",
                    Some("file:///work/s.js"),
                    "scriptElement",
                ),
            );
            let new_source = client.wait_event("newSource").await?;
            assert_eq!(new_source["body"]["threadId"], json!(thread_id));
            assert_eq!(new_source["body"]["url"], "file:///work/s.js");
            assert_eq!(new_source["body"]["path"], "/work/s.js");

            browser.destroy_target(0);
            let exited = client.wait_event("thread").await?;
            assert_eq!(exited["body"]["reason"], "exited");
            assert_eq!(exited["body"]["threadId"], json!(thread_id));
            let custom = client.wait_event("threadExited").await?;
            assert_eq!(custom["body"]["id"], json!(thread_id));

            // The id is gone; the stack of a dead thread is an error.
            let seq = client
                .request("stackTrace", json!({"threadId": thread_id}))
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["success"], false);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn hit_count_breakpoint_surfaces_third_stop() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let options = MockOptions {
                tabs: one_tab(),
                frames: vec![frame_at("server1.src1", 2, "f")],
                ..MockOptions::default()
            };
            let (mut client, mut browser) = start_session(options, json!({})).await?;
            let thread_id = expect_thread_started(&mut client).await?;

            browser.resources(
                0,
                source_resource(
                    "server1.src1",
                    Some("file:///work/s.js"),
                    "scriptElement",
                ),
            );
            client.wait_event("newSource").await?;

            let seq = client
                .request(
                    "setBreakpoints",
                    json!({
                        "source": {"path": "/work/s.js"},
                        "breakpoints": [{"line": 2, "hitCondition": "3"}],
                    }),
                )
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["body"]["breakpoints"][0]["verified"], true);
            assert_eq!(
                browser.state.borrow().breakpoints_set,
                vec![("file:///work/s.js".to_string(), 2)]
            );

            // First two hits are swallowed and auto-resumed.
            for _ in 0..2 {
                browser.pause(0, json!({"type": "breakpoint"}), frame_at("server1.src1", 2, "f"));
                browser.expect_resume(0).await?;
                client.expect_no_event("stopped").await?;
            }

            // The third surfaces.
            browser.pause(0, json!({"type": "breakpoint"}), frame_at("server1.src1", 2, "f"));
            let stopped = client.wait_event("stopped").await?;
            assert_eq!(stopped["body"]["reason"], "breakpoint");
            assert_eq!(stopped["body"]["threadId"], json!(thread_id));
            assert_eq!(stopped["body"]["allThreadsStopped"], false);

            // The paused frame shows i == 2.
            let seq = client
                .request("stackTrace", json!({"threadId": thread_id}))
                .await?;
            let response = client.wait_response(seq).await?;
            let frame = &response["body"]["stackFrames"][0];
            assert_eq!(frame["name"], "f");
            assert_eq!(frame["line"], 2);
            assert_eq!(frame["source"]["path"], "/work/s.js");
            let frame_id = frame["id"].as_i64().unwrap();

            let seq = client.request("scopes", json!({"frameId": frame_id})).await?;
            let response = client.wait_response(seq).await?;
            let locals = response["body"]["scopes"]
                .as_array()
                .unwrap()
                .iter()
                .find(|s| s["name"] == "Locals")
                .cloned()
                .ok_or_else(|| anyhow!("no Locals scope"))?;
            let reference = locals["variablesReference"].as_i64().unwrap();

            let seq = client
                .request("variables", json!({"variablesReference": reference}))
                .await?;
            let response = client.wait_response(seq).await?;
            let variables = response["body"]["variables"].as_array().unwrap();
            let i = variables
                .iter()
                .find(|v| v["name"] == "i")
                .ok_or_else(|| anyhow!("no variable i"))?;
            assert_eq!(i["value"], "2");
            Ok(())
        })
        .await
}

#[tokio::test]
async fn blackboxed_stop_is_auto_resumed() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let (mut client, mut browser) = start_session(
                MockOptions {
                    tabs: one_tab(),
                    ..MockOptions::default()
                },
                json!({"filesToSkip": ["**/lib/**"]}),
            )
            .await?;
            expect_thread_started(&mut client).await?;

            browser.resources(
                0,
                source_resource(
                    "server1.lib1",
                    Some("file:///work/lib/a.js"),
                    "scriptElement",
                ),
            );
            client.wait_event("newSource").await?;

            // The skip rule propagated to the engine.
            assert_eq!(
                browser.state.borrow().blackboxed,
                vec![("server1.lib1".to_string(), true)]
            );

            // A stop that races the blackbox flag is swallowed.
            browser.pause(
                0,
                json!({"type": "exception"}),
                frame_at("server1.lib1", 1, "boom"),
            );
            browser.expect_resume(0).await?;
            client.expect_no_event("stopped").await?;
            Ok(())
        })
        .await
}

#[tokio::test]
async fn debugger_eval_exceptions_do_not_stop() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let (mut client, mut browser) = start_session(
                MockOptions {
                    tabs: one_tab(),
                    ..MockOptions::default()
                },
                json!({}),
            )
            .await?;
            expect_thread_started(&mut client).await?;

            browser.resources(0, source_resource("server1.eval1", None, "debugger eval"));
            client.wait_event("newSource").await?;

            browser.pause(
                0,
                json!({"type": "exception"}),
                frame_at("server1.eval1", 1, "(eval)"),
            );
            browser.expect_resume(0).await?;
            client.expect_no_event("stopped").await?;
            Ok(())
        })
        .await
}

#[tokio::test]
async fn repl_eval_exception_reports_error_output() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let expression = "(() => { throw new Error('x'); })()";
            let options = MockOptions {
                tabs: one_tab(),
                eval_responses: vec![(
                    expression.to_string(),
                    json!({
                        "exception": {
                            "type": "object",
                            "class": "Error",
                            "actor": "server1.exc1",
                            "preview": {"kind": "Error", "name": "Error", "message": "x"},
                        },
                        "exceptionMessage": "Error: x",
                    }),
                )],
                ..MockOptions::default()
            };
            let (mut client, _browser) = start_session(options, json!({})).await?;
            expect_thread_started(&mut client).await?;

            let seq = client
                .request(
                    "evaluate",
                    json!({"expression": expression, "context": "repl"}),
                )
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["success"], false);

            let output = client.wait_event("output").await?;
            assert_eq!(output["body"]["category"], "stderr");
            assert!(
                output["body"]["output"]
                    .as_str()
                    .unwrap()
                    .contains("Error: x")
            );
            client.expect_no_event("stopped").await?;
            Ok(())
        })
        .await
}

#[tokio::test]
async fn console_timer_produces_single_output() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let (mut client, browser) = start_session(
                MockOptions {
                    tabs: one_tab(),
                    ..MockOptions::default()
                },
                json!({"showConsoleCallLocation": false}),
            )
            .await?;
            expect_thread_started(&mut client).await?;

            browser.resources(
                0,
                json!([
                    {"resourceType": "console-message",
                     "message": {"level": "time", "arguments": ["t"]}},
                    {"resourceType": "console-message",
                     "message": {"level": "timeEnd", "arguments": ["t"],
                                 "timer": {"name": "t", "duration": 3}}},
                ]),
            );

            let output = client.wait_event("output").await?;
            let text = output["body"]["output"].as_str().unwrap();
            let pattern = regex::Regex::new(r"^t: \d+(\.\d+)?ms - timer ended").unwrap();
            assert!(pattern.is_match(text), "unexpected timer output: {text:?}");

            // The `time` call itself printed nothing, so nothing else is in
            // flight.
            client.expect_no_event("output").await?;
            Ok(())
        })
        .await
}

#[tokio::test]
async fn variable_references_die_with_the_pause() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let options = MockOptions {
                tabs: one_tab(),
                frames: vec![frame_at("server1.src1", 2, "f")],
                ..MockOptions::default()
            };
            let (mut client, mut browser) = start_session(options, json!({})).await?;
            let thread_id = expect_thread_started(&mut client).await?;

            browser.resources(
                0,
                source_resource(
                    "server1.src1",
                    Some("file:///work/s.js"),
                    "scriptElement",
                ),
            );
            client.wait_event("newSource").await?;

            browser.pause(
                0,
                json!({"type": "debuggerStatement"}),
                frame_at("server1.src1", 2, "f"),
            );
            let stopped = client.wait_event("stopped").await?;
            assert_eq!(stopped["body"]["reason"], "debugger statement");

            let seq = client
                .request("stackTrace", json!({"threadId": thread_id}))
                .await?;
            let response = client.wait_response(seq).await?;
            let frame_id = response["body"]["stackFrames"][0]["id"].as_i64().unwrap();

            let seq = client.request("scopes", json!({"frameId": frame_id})).await?;
            let response = client.wait_response(seq).await?;
            let reference = response["body"]["scopes"][0]["variablesReference"]
                .as_i64()
                .unwrap();

            // Resume; disposal precedes the continued event.
            let seq = client
                .request("continue", json!({"threadId": thread_id}))
                .await?;
            client.wait_response(seq).await?;
            browser.expect_resume(0).await?;
            let continued = client.wait_event("continued").await?;
            assert_eq!(continued["body"]["threadId"], json!(thread_id));

            let seq = client
                .request("variables", json!({"variablesReference": reference}))
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["success"], false);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn legacy_discovery_reloads_first_enumeration_tabs_once() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let options = MockOptions {
                modern: false,
                tabs: one_tab(),
                ..MockOptions::default()
            };
            let (mut client, browser) = start_session(
                options,
                json!({"reloadTabs": true}),
            )
            .await?;

            // The tab came in through listTabs and its per-tab watcher.
            let first = expect_thread_started(&mut client).await?;
            assert_eq!(first, 1);
            assert_eq!(
                browser.state.borrow().reloads,
                1,
                "the enumerated tab reloads exactly once"
            );

            // A tab opened after the first enumeration attaches but does not
            // reload.
            browser.open_tab("https://app.test/second.html", "Second");
            let second = expect_thread_started(&mut client).await?;
            assert_ne!(second, first);
            assert_eq!(browser.state.borrow().reloads, 1);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn breakpoint_snaps_to_next_valid_position() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let options = MockOptions {
                tabs: one_tab(),
                breakpoint_positions: vec![json!({"line": 2, "column": 0})],
                ..MockOptions::default()
            };
            let (mut client, browser) = start_session(options, json!({})).await?;
            expect_thread_started(&mut client).await?;

            // Breakpoint requested before the source exists; the reverse path
            // mapping installs it optimistically at the requested line.
            let seq = client
                .request(
                    "setBreakpoints",
                    json!({
                        "source": {"path": "/work/s.js"},
                        "breakpoints": [{"line": 1}],
                    }),
                )
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["body"]["breakpoints"][0]["verified"], true);
            assert_eq!(response["body"]["breakpoints"][0]["line"], 1);

            // Once the source arrives, its position table says line 1 holds
            // no code; the breakpoint is reported at the next valid line.
            browser.resources(
                0,
                source_resource(
                    "server1.src1",
                    Some("file:///work/s.js"),
                    "scriptElement",
                ),
            );
            client.wait_event("newSource").await?;
            let changed = client.wait_event("breakpoint").await?;
            assert_eq!(changed["body"]["reason"], "changed");
            assert_eq!(changed["body"]["breakpoint"]["line"], 2);
            assert_eq!(changed["body"]["breakpoint"]["verified"], true);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn source_request_prettifies_minified_text() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let minified: String = "var a=1;".repeat(100);
            let pretty = "var a = 1;\nvar a = 1;\n".to_string();
            let options = MockOptions {
                tabs: one_tab(),
                source_text: minified,
                pretty_text: Some(pretty.clone()),
                ..MockOptions::default()
            };
            let (mut client, browser) = start_session(options, json!({})).await?;
            expect_thread_started(&mut client).await?;

            // A source with no URL has no local path; the editor reads it
            // through the `source` request.
            browser.resources(0, source_resource("server1.min1", None, "scriptElement"));
            let new_source = client.wait_event("newSource").await?;
            let source_id = new_source["body"]["sourceId"].as_i64().unwrap();

            let seq = client
                .request("source", json!({"sourceReference": source_id}))
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["body"]["content"], json!(pretty));
            assert!(browser.state.borrow().pretty_requested);
            Ok(())
        })
        .await
}

#[tokio::test]
async fn thread_lifetime_grips_release_on_thread_exit() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let options = MockOptions {
                tabs: one_tab(),
                eval_responses: vec![(
                    "window.model".to_string(),
                    json!({
                        "result": {
                            "type": "object",
                            "class": "Object",
                            "actor": "server1.obj42",
                        },
                    }),
                )],
                ..MockOptions::default()
            };
            let (mut client, browser) = start_session(options, json!({})).await?;
            expect_thread_started(&mut client).await?;

            // A REPL result grip is thread-lifetime.
            let seq = client
                .request(
                    "evaluate",
                    json!({"expression": "window.model", "context": "repl"}),
                )
                .await?;
            let response = client.wait_response(seq).await?;
            assert!(response["body"]["variablesReference"].as_i64().unwrap() > 0);

            browser.destroy_target(0);
            client.wait_event("threadExited").await?;

            // The dying thread's grip reference is released on the wire, not
            // just forgotten locally.
            let mut released = false;
            for _ in 0..50 {
                if browser
                    .state
                    .borrow()
                    .released
                    .iter()
                    .any(|actor| actor == "server1.obj42")
                {
                    released = true;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            assert!(released, "grip release never reached the browser");
            Ok(())
        })
        .await
}

#[tokio::test]
async fn disconnect_terminates_cleanly() -> anyhow::Result<()> {
    LocalSet::new()
        .run_until(async {
            let (mut client, _browser) = start_session(
                MockOptions {
                    tabs: one_tab(),
                    ..MockOptions::default()
                },
                json!({}),
            )
            .await?;
            expect_thread_started(&mut client).await?;

            let seq = client
                .request("disconnect", json!({"terminateDebuggee": false}))
                .await?;
            let response = client.wait_response(seq).await?;
            assert_eq!(response["success"], true);
            client.wait_event("terminated").await?;
            Ok(())
        })
        .await
}
