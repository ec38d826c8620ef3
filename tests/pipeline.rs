//! Cross-phase pipeline tests: parse -> typecheck -> normalize -> pretty.

mod common;

use thingtalk::ast::{
    iterate_slots, strip_locations, BooleanExpression, Input, Statement, Table, Value,
};
use thingtalk::foundation::CancellationToken;
use thingtalk::types::Operator;
use thingtalk::{normalize, parse, pretty, typecheck, TypecheckOptions};

async fn checked(source: &str) -> Input {
    let input = parse(source).unwrap_or_else(|e| panic!("parse failed for {source:?}: {e}"));
    typecheck(
        &input,
        &common::catalogue(),
        &TypecheckOptions::default(),
        &CancellationToken::none(),
    )
    .await
    .unwrap_or_else(|e| panic!("typecheck failed for {source:?}: {e}"))
}

fn command_table(input: &Input) -> &Table {
    match input {
        Input::Program(program) => match &program.statements[0] {
            Statement::Command { table: Some(table), .. } => table,
            other => panic!("expected command with table, got {other:?}"),
        },
        other => panic!("expected program, got {other:?}"),
    }
}

#[tokio::test]
async fn xkcd_command_normalize_is_identity() {
    let typed = checked("now => @com.xkcd.get_comic(number=42) => notify;").await;
    let normalized = normalize(&typed).unwrap();
    assert_eq!(typed, normalized);
}

#[tokio::test]
async fn monitor_binds_text_from_output_scope() {
    // `text` flows from the monitored query into the posted status.
    checked("monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);").await;
}

#[tokio::test]
async fn or_of_equalities_normalizes_to_in_array() {
    let typed =
        checked("now => @com.gmail.inbox(), labels == \"a\" || labels == \"b\" => notify;").await;
    let normalized = normalize(&typed).unwrap();
    match command_table(&normalized) {
        Table::Filter { filter, .. } => match filter {
            BooleanExpression::Atom { name, op, value, .. } => {
                assert_eq!(name, "labels");
                assert_eq!(*op, Operator::InArray);
                assert_eq!(
                    *value,
                    Value::Array(vec![
                        Value::String("a".to_string()),
                        Value::String("b".to_string())
                    ])
                );
            }
            other => panic!("expected fused in_array atom, got {other:?}"),
        },
        other => panic!("expected filter, got {other:?}"),
    }
}

#[tokio::test]
async fn sort_and_slice_structure() {
    let typed = checked(
        "now => sort file_size asc of @com.google.drive.list_drive_files()[1:5] => notify;",
    )
    .await;
    let normalized = normalize(&typed).unwrap();
    match command_table(&normalized) {
        Table::Slice { table, base, limit } => {
            assert_eq!(*base, Value::Number(1.0));
            assert_eq!(*limit, Value::Number(5.0));
            assert!(matches!(table.as_ref(), Table::Sort { .. }));
        }
        other => panic!("expected Slice(Sort(...)), got {other:?}"),
    }
}

#[tokio::test]
async fn default_temperature_resolves_to_celsius() {
    let typed = checked(
        "now => @org.thingpedia.weather.current(location=$location.home), temperature >= 5defaultTemperature => notify;",
    )
    .await;
    let mut saw_measure = false;
    for slot in iterate_slots(&typed) {
        if let Value::Measure { unit, .. } = &slot.value {
            assert_eq!(unit, "C");
            saw_measure = true;
        }
    }
    assert!(saw_measure);
}

#[tokio::test]
async fn normalization_is_idempotent() {
    let sources = [
        "now => @com.xkcd.get_comic(number=42) => notify;",
        "now => @com.gmail.inbox(), labels == \"a\" || labels == \"b\" => notify;",
        "now => sort file_size asc of @com.google.drive.list_drive_files()[1:5] => notify;",
        "now => [file_name] of @com.google.drive.list_drive_files() => notify;",
        "now => @com.gmail.inbox(), !(labels == \"spam\") && sender =~ \"bob\" => notify;",
        "monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);",
    ];
    for source in sources {
        let typed = checked(source).await;
        let once = normalize(&typed).unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice, "normalize not idempotent for {source:?}");
    }
}

#[tokio::test]
async fn normalized_filters_are_cnf() {
    let typed = checked(
        "now => @com.gmail.inbox(), (labels == \"a\" || sender =~ \"bob\") && subject =~ \"hi\" => notify;",
    )
    .await;
    let normalized = normalize(&typed).unwrap();
    match command_table(&normalized) {
        Table::Filter { filter, .. } => assert_cnf(filter),
        other => panic!("expected filter, got {other:?}"),
    }
}

fn assert_cnf(filter: &BooleanExpression) {
    // And( Or( literal ... ) ... ) with no deeper nesting.
    let clauses: Vec<&BooleanExpression> = match filter {
        BooleanExpression::And(ops) => ops.iter().collect(),
        other => vec![other],
    };
    for clause in clauses {
        let literals: Vec<&BooleanExpression> = match clause {
            BooleanExpression::Or(ops) => ops.iter().collect(),
            other => vec![other],
        };
        for literal in literals {
            match literal {
                BooleanExpression::Atom { .. }
                | BooleanExpression::Compute { .. }
                | BooleanExpression::DontCare { .. }
                | BooleanExpression::External { .. } => {}
                BooleanExpression::Not(inner) => {
                    assert!(
                        !matches!(
                            inner.as_ref(),
                            BooleanExpression::And(_) | BooleanExpression::Or(_)
                        ),
                        "negation of a connective survived normalization"
                    );
                }
                other => panic!("non-literal {other:?} inside CNF clause"),
            }
        }
    }
}

#[tokio::test]
async fn minimal_projection_widens_to_id() {
    let typed =
        checked("now => [file_name] of @com.google.drive.list_drive_files() => notify;").await;
    let normalized = normalize(&typed).unwrap();
    match command_table(&normalized) {
        Table::Projection { args, .. } => {
            assert!(args.contains(&"file_name".to_string()));
            assert!(
                args.contains(&"id".to_string()),
                "projection must retain the minimal projection"
            );
        }
        other => panic!("expected projection, got {other:?}"),
    }
}

#[tokio::test]
async fn filter_pushes_down_into_join() {
    let typed = checked(
        "now => @com.gmail.inbox() join @com.twitter.home_timeline(), subject =~ \"hi\" => notify;",
    )
    .await;
    let normalized = normalize(&typed).unwrap();
    // `subject` only exists on the gmail side, so the filter moves inside
    // the join.
    match command_table(&normalized) {
        Table::Join { lhs, .. } => match lhs.as_ref() {
            Table::Filter { filter, .. } => match filter {
                BooleanExpression::Atom { name, .. } => assert_eq!(name, "subject"),
                other => panic!("expected atom, got {other:?}"),
            },
            other => panic!("expected pushed-down filter, got {other:?}"),
        },
        other => panic!("expected join at top, got {other:?}"),
    }
}

#[tokio::test]
async fn slot_iteration_covers_every_hole() {
    let typed = checked(
        "now => @com.twitter.search(query=$undefined), author == $undefined => @com.twitter.post(status=$undefined);",
    )
    .await;
    let empty: Vec<_> = iterate_slots(&typed).filter(|s| s.is_empty()).collect();
    assert_eq!(empty.len(), 3);
    // Slots carry their declared types once schemas are resolved.
    assert!(empty.iter().any(|s| s.name == "query"));
    assert!(empty.iter().any(|s| s.name == "author"));
    assert!(empty.iter().any(|s| s.name == "status"));
    for slot in &empty {
        assert!(slot.ty.is_some(), "slot {} lost its type", slot.name);
    }
}

#[tokio::test]
async fn pretty_survives_the_full_pipeline() {
    let sources = [
        "now => @com.xkcd.get_comic(number=42) => notify;",
        "now => @com.gmail.inbox(), labels == \"a\" || labels == \"b\" => notify;",
        "monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);",
        "now => sort file_size asc of @com.google.drive.list_drive_files()[1:5] => notify;",
    ];
    for source in sources {
        let typed = checked(source).await;
        let normalized = normalize(&typed).unwrap();
        let printed = pretty(&normalized);
        let reparsed = parse(&printed)
            .unwrap_or_else(|e| panic!("reparse failed for {printed:?}: {e}"));
        let rechecked = typecheck(
            &reparsed,
            &common::catalogue(),
            &TypecheckOptions::default(),
            &CancellationToken::none(),
        )
        .await
        .unwrap();
        assert_eq!(
            strip_locations(&normalized),
            strip_locations(&normalize(&rechecked).unwrap()),
            "pipeline not stable for {source:?}"
        );
    }
}

#[tokio::test]
async fn typecheck_determinism() {
    let source = "now => @com.gmail.inbox(), labels == \"a\" => notify;";
    let input = parse(source).unwrap();
    let retriever = common::catalogue();
    let opts = TypecheckOptions::default();
    let a = typecheck(&input, &retriever, &opts, &CancellationToken::none())
        .await
        .unwrap();
    let b = typecheck(&input, &retriever, &opts, &CancellationToken::none())
        .await
        .unwrap();
    assert_eq!(a, b);
}
