use std::sync::Arc;

use strand_core::{DebugFlags, Flow, Op, StepNode, VarScope};

use super::*;
use crate::instance::CollectingSink;
use crate::test_support::*;

fn decide(
    condition: Vec<StepNode>,
    then: Vec<StepNode>,
    otherwise: Option<Vec<StepNode>>,
) -> Vec<StepNode> {
    vec![node(Op::Decide {
        condition: block(condition),
        then: block(then),
        otherwise: otherwise.map(block),
    })]
}

fn while_loop(condition: Vec<StepNode>, body: Vec<StepNode>) -> Vec<StepNode> {
    vec![node(Op::Goto {
        condition: block(condition),
        body: block(body),
        increment: None,
    })]
}

fn foreach(
    source: Vec<StepNode>,
    key: Option<&str>,
    value: &str,
    body: Vec<StepNode>,
) -> Vec<StepNode> {
    let mut steps = framed(
        vec![source],
        Op::IterateCreate {
            key: key.map(str::to_string),
            value: value.to_string(),
        },
    );
    steps.extend(while_loop(vec![node(Op::IterateNext)], body));
    steps.push(node(Op::IterateDestroy));
    steps
}

fn try_catch(body: Vec<StepNode>, var: &str, handler: Vec<StepNode>) -> Vec<StepNode> {
    let mut body = body;
    body.push(node(Op::PopTry));
    vec![node(Op::Try {
        body: block(body),
        handler: block(handler),
        var: var.to_string(),
    })]
}

fn seq(parts: Vec<Vec<StepNode>>) -> Vec<StepNode> {
    parts.into_iter().flatten().collect()
}

fn sink_instance(flags: DebugFlags) -> (Arc<ScriptInstance>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let instance = instance_with(|options| {
        options.debug_flags = Some(flags);
        options.diagnostics = Some(sink.clone());
    });
    (instance, sink)
}

#[test]
fn top_level_assignments_become_globals() {
    let instance = test_instance();
    let value = run_with(
        &instance,
        seq(vec![
            assign("$x", op("+", vec![lit(2), lit(3)])),
            ret(op("*", vec![var("$x"), lit(2)])),
        ]),
    );
    assert_eq!(value, Value::from(10));
    assert_eq!(instance.global("$x"), Some(Value::from(5)));
}

#[test]
fn blocks_leave_the_frame_stack_as_they_found_it() {
    let instance = test_instance();
    let linked = instance
        .link(&block(seq(vec![
            op("+", vec![lit(1), lit(2)]),
            assign("$y", lit("kept")),
            op(".", vec![var("$y"), lit("!")]),
        ])))
        .expect("link");
    let mut env = Environment::new(instance.clone());
    env.create_frame();
    let value = evaluate(&linked, &mut env).expect("evaluate");
    assert_eq!(value, Value::from("kept!"));
    assert_eq!(env.frame_depth(), 1);
    assert!(env.current_frame().is_empty());

    let failing = instance
        .link(&block(op("<=>", vec![lit(1), lit(2)])))
        .expect("link");
    let fault = evaluate(&failing, &mut env).expect_err("unknown operator");
    assert_eq!(fault.code(), "ENGINE_OPERATOR_UNKNOWN");
    assert_eq!(env.frame_depth(), 1);
}

#[test]
fn calls_replace_the_argument_frame_with_one_result() {
    let instance = test_instance();
    let mut env = Environment::new(instance);
    env.create_frame();
    env.create_frame();
    env.push(Value::from(4)).expect("push");
    let double = Callable::native(|_, _, args| Ok(Value::from(args[0].to_integer() * 2)));
    let value = call_function(&mut env, &double, "double", 1).expect("call");
    assert_eq!(value, Value::from(8));
    assert_eq!(env.frame_depth(), 1);
    assert_eq!(env.current_frame(), &[Value::from(8)]);

    env.create_frame();
    let messy = Callable::native(|env, _, _| {
        env.create_frame();
        env.push(Value::from("left behind"))?;
        env.flag_error(Value::from("bad"));
        Ok(Value::empty())
    });
    let value = call_function(&mut env, &messy, "messy", 2).expect("call");
    assert!(value.is_empty());
    assert_eq!(env.frame_depth(), 1);
    assert_eq!(env.current_frame(), &[Value::from(8), Value::empty()]);
    assert_eq!(env.thrown_value(), Some(&Value::from("bad")));
}

#[test]
fn indexes_count_from_the_end_and_oversized_writes_throw() {
    assert_eq!(run(ret(index(lit("abc"), lit(-1)))), Value::from("c"));
    assert_eq!(run(ret(index(lit("abc"), lit(1)))), Value::from("b"));
    assert!(run(ret(index(lit("abc"), lit(-4)))).is_empty());
    assert!(run(ret(index(lit("abc"), lit(3)))).is_empty());

    let value = run(seq(vec![
        assign("@a", call("array", vec![lit(1)])),
        try_catch(
            framed(vec![var("@a"), lit(i64::MAX), lit(2)], Op::AssignIndex),
            "$e",
            ret(var("$e")),
        ),
    ]));
    assert!(value
        .to_string()
        .starts_with("index 9223372036854775807 is out of bounds"));
}

#[test]
fn decide_runs_the_matching_branch() {
    let branch = |value: i64| {
        run(seq(vec![
            assign("$n", lit(value)),
            decide(
                op(">", vec![var("$n"), lit(10)]),
                ret(lit("big")),
                Some(ret(lit("small"))),
            ),
        ]))
    };
    assert_eq!(branch(42), Value::from("big"));
    assert_eq!(branch(3), Value::from("small"));
}

#[test]
fn loops_honor_break_and_continue() {
    let value = run(seq(vec![
        assign("$i", lit(0)),
        assign("$sum", lit(0)),
        while_loop(
            op("<", vec![var("$i"), lit(10)]),
            seq(vec![
                assign("$i", op("+", vec![var("$i"), lit(1)])),
                decide(
                    op("==", vec![op("%", vec![var("$i"), lit(2)]), lit(0)]),
                    flow(Flow::Continue, empty()),
                    None,
                ),
                decide(
                    op(">", vec![var("$i"), lit(7)]),
                    flow(Flow::Break, empty()),
                    None,
                ),
                assign("$sum", op("+", vec![var("$sum"), var("$i")])),
            ]),
        ),
        ret(var("$sum")),
    ]));
    assert_eq!(value, Value::from(16));
}

#[test]
fn foreach_binds_keys_and_values_in_order() {
    let value = run(seq(vec![
        assign(
            "%m",
            call("map", vec![lit("a"), lit(1), lit("b"), lit(2)]),
        ),
        foreach(
            var("%m"),
            Some("$k"),
            "$v",
            assign("$out", template("${$out}${$k}=${$v};")),
        ),
        ret(var("$out")),
    ]));
    assert_eq!(value, Value::from("a=1;b=2;"));
}

#[test]
fn foreach_over_a_scalar_warns_and_skips_the_body() {
    let (instance, sink) = sink_instance(DebugFlags::SHOW_WARNINGS);
    let value = run_with(
        &instance,
        seq(vec![
            assign("$count", lit(0)),
            foreach(
                lit(5),
                None,
                "$v",
                assign("$count", op("+", vec![var("$count"), lit(1)])),
            ),
            ret(var("$count")),
        ]),
    );
    assert_eq!(value, Value::from(0));
    assert!(sink
        .messages()
        .iter()
        .any(|message| message == "cannot iterate over 5"));
}

#[test]
fn closures_capture_locals_and_bind_positional_arguments() {
    let value = run(seq(vec![
        assign_scoped("$base", VarScope::Local, lit(10)),
        assign(
            "$add",
            closure(&["$x"], ret(op("+", vec![var("$base"), var("$x")]))),
        ),
        ret(call("$add", vec![lit(5)])),
    ]));
    assert_eq!(value, Value::from(15));

    let value = run(seq(vec![
        assign(
            "$describe",
            closure(
                &[],
                ret(template("${$0}:${$2}:${$3}")),
            ),
        ),
        ret(call("$describe", vec![lit("a"), lit("b")])),
    ]));
    assert_eq!(value, Value::from("$describe:b:"));
}

#[test]
fn bound_functions_recurse() {
    let value = run(seq(vec![
        bind(
            "fact",
            &["$n"],
            seq(vec![
                decide(op("<=", vec![var("$n"), lit(1)]), ret(lit(1)), None),
                ret(op(
                    "*",
                    vec![
                        var("$n"),
                        call("fact", vec![op("-", vec![var("$n"), lit(1)])]),
                    ],
                )),
            ]),
        ),
        ret(call("fact", vec![lit(5)])),
    ]));
    assert_eq!(value, Value::from(120));
}

#[test]
fn runaway_recursion_hits_the_call_depth_limit() {
    let instance = instance_with(|options| options.max_call_depth = Some(16));
    let fault = run_outcome(
        &instance,
        seq(vec![
            bind("spin", &[], ret(call("spin", Vec::new()))),
            ret(call("spin", Vec::new())),
        ]),
    )
    .expect_err("depth limit");
    assert_eq!(fault.code(), "ENGINE_CALL_DEPTH");
}

#[test]
fn inline_functions_run_in_the_callers_variables() {
    let value = run(seq(vec![
        vec![node(Op::BindInline {
            function: "bump".to_string(),
            body: block(assign("$x", op("+", vec![var("$x"), lit(1)]))),
        })],
        bind(
            "outer",
            &[],
            seq(vec![
                assign_scoped("$x", VarScope::Local, lit(41)),
                call("bump", Vec::new()),
                ret(var("$x")),
            ]),
        ),
        ret(call("outer", Vec::new())),
    ]));
    assert_eq!(value, Value::from(42));
}

#[test]
fn try_catches_thrown_values_and_missing_functions() {
    let value = run(try_catch(
        throw(lit("boom")),
        "$e",
        ret(template("caught ${$e}")),
    ));
    assert_eq!(value, Value::from("caught boom"));

    let value = run(try_catch(
        call("nope", Vec::new()),
        "$e",
        ret(var("$e")),
    ));
    assert_eq!(
        value,
        Value::from("Attempted to call non-existent function nope")
    );

    let value = run(seq(vec![
        try_catch(assign("$ok", lit("fine")), "$e", ret(lit("unreachable"))),
        ret(var("$ok")),
    ]));
    assert_eq!(value, Value::from("fine"));
}

#[test]
fn uncaught_throws_complete_with_a_stack_trace() {
    let (instance, sink) = sink_instance(DebugFlags::SHOW_WARNINGS);
    let outcome = run_outcome(
        &instance,
        seq(vec![
            bind("fail", &[], throw(lit("bad"))),
            ret(call("fail", Vec::new())),
        ]),
    )
    .expect("no engine fault");
    let Completion::Thrown(value) = outcome else {
        panic!("expected a thrown completion");
    };
    assert_eq!(value, Value::from("bad"));
    let trace = instance
        .stack_trace()
        .into_iter()
        .map(|frame| frame.description)
        .collect::<Vec<_>>();
    assert_eq!(trace, vec!["fail()".to_string(), "test()".to_string()]);
    assert!(sink
        .messages()
        .iter()
        .any(|message| message == "uncaught exception: bad"));
}

#[test]
fn yield_suspends_and_resumes_a_generator() {
    let generator = closure(
        &[],
        seq(vec![
            assign_scoped("$i", VarScope::Local, lit(0)),
            while_loop(
                op("<", vec![var("$i"), lit(3)]),
                seq(vec![
                    assign("$i", op("+", vec![var("$i"), lit(1)])),
                    flow(Flow::Yield, var("$i")),
                ]),
            ),
        ]),
    );
    let value = run(seq(vec![
        assign("$gen", generator),
        assign("$a", call("$gen", Vec::new())),
        assign("$b", call("$gen", Vec::new())),
        assign("$c", call("$gen", Vec::new())),
        assign("$d", call("$gen", Vec::new())),
        assign("$e", call("$gen", Vec::new())),
        ret(template("${$a},${$b},${$c},[${$d}],${$e}")),
    ]));
    assert_eq!(value, Value::from("1,2,3,[],1"));
}

#[test]
fn callcc_hands_the_suspended_caller_to_the_target() {
    let value = run(seq(vec![
        assign(
            "$b",
            closure(&["$k"], ret(template("b resumed by ${$k}"))),
        ),
        bind(
            "a",
            &[],
            seq(vec![flow(Flow::Callcc, var("$b")), ret(lit("a finished"))]),
        ),
        ret(call("a", Vec::new())),
    ]));
    assert_eq!(value, Value::from("b resumed by &a"));

    let value = run(seq(vec![
        assign("$b", closure(&["$k"], ret(call("$k", Vec::new())))),
        bind(
            "a",
            &[],
            seq(vec![flow(Flow::Callcc, var("$b")), ret(lit("a finished"))]),
        ),
        ret(call("a", Vec::new())),
    ]));
    assert_eq!(value, Value::from("a finished"));
}

#[test]
fn call_tracing_reports_arguments_and_results() {
    let (instance, sink) = sink_instance(DebugFlags::TRACE_CALLS);
    run_with(
        &instance,
        seq(vec![
            bind("double", &["$n"], ret(op("*", vec![var("$n"), lit(2)]))),
            ret(call("double", vec![lit(21)])),
        ]),
    );
    let messages = sink.messages();
    assert!(messages.iter().any(|message| message == "double(21) = 42"));
    assert!(messages.iter().any(|message| message == "test() = 42"));
}

#[test]
fn profiling_counts_calls_without_tracing() {
    let (instance, sink) = sink_instance(DebugFlags::PROFILE_ONLY);
    run_with(
        &instance,
        seq(vec![
            bind("work", &[], ret(lit(1))),
            call("work", Vec::new()),
            ret(call("work", Vec::new())),
        ]),
    );
    let statistics = instance.profiler_statistics();
    let work = statistics
        .iter()
        .find(|statistic| statistic.function == "work")
        .expect("work profiled");
    assert_eq!(work.calls, 2);
    assert!(statistics
        .iter()
        .any(|statistic| statistic.function == "test"));
    assert!(sink.messages().is_empty());
}

#[test]
fn sanitized_input_reaches_sensitive_sinks() {
    let instance = instance_with(|options| {
        options.taint_mode = Some(true);
        options.console = Some(Arc::new(crate::io::MemoryStream::with_input([
            "hello", "world",
        ])));
    });
    let value = run_with(
        &instance,
        seq(vec![
            assign("$line", call("readln", Vec::new())),
            assign("$shout", op(".", vec![var("$line"), lit("!")])),
            assign("$clean", call("untaint", vec![var("$shout")])),
            ret(call(
                "array",
                vec![
                    call("is_tainted", vec![var("$line")]),
                    call("is_tainted", vec![var("$shout")]),
                    call("is_tainted", vec![var("$clean")]),
                ],
            )),
        ]),
    );
    let flags = value
        .as_array()
        .expect("array")
        .snapshot()
        .iter()
        .map(Value::to_integer)
        .collect::<Vec<_>>();
    assert_eq!(flags, vec![1, 1, 0]);

    let fault = run_outcome(
        &instance,
        seq(vec![
            assign("$cmd", call("readln", Vec::new())),
            ret(call("exec", vec![var("$cmd")])),
        ]),
    )
    .expect_err("tainted exec");
    assert_eq!(fault.code(), "SECURITY_TAINTED_ARGUMENT");
}

#[test]
fn closures_that_sanitize_return_clean_values() {
    let instance = taint_instance();
    let value = run_with(
        &instance,
        seq(vec![
            assign(
                "$f",
                closure(&["$x"], ret(call("untaint", vec![var("$x")]))),
            ),
            ret(call("$f", vec![call("taint", vec![lit("secret")])])),
        ]),
    );
    assert_eq!(value, Value::from("secret"));
    assert!(!value.is_tainted());

    let value = run_with(
        &instance,
        seq(vec![
            assign("$g", closure(&["$x"], ret(var("$x")))),
            ret(call("$g", vec![call("taint", vec![lit("secret")])])),
        ]),
    );
    assert!(value.is_tainted());
}
