//! NN codec tests: encoding, entity allocation, decoding, compatibility.

mod common;

use thingtalk::ast::{strip_locations, Input, Value};
use thingtalk::foundation::CancellationToken;
use thingtalk::nn::{
    self, apply_compatibility, AllocationMode, EncodeOptions, NnSyntaxVersion,
};
use thingtalk::{normalize, parse, typecheck, Error, TypecheckOptions};

fn sentence(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

async fn prepared(source: &str) -> Input {
    let input = parse(source).unwrap();
    let typed = typecheck(
        &input,
        &common::catalogue(),
        &TypecheckOptions::default(),
        &CancellationToken::none(),
    )
    .await
    .unwrap();
    normalize(&typed).unwrap()
}

async fn assert_roundtrip(source: &str, sentence_text: &str) {
    let program = prepared(source).await;
    let s = sentence(sentence_text);
    let (tokens, entities) = nn::encode(&program, &s)
        .unwrap_or_else(|e| panic!("encode failed for {source:?}: {e}"));
    let decoded = nn::decode_and_typecheck(
        &tokens,
        &entities,
        &common::catalogue(),
        &TypecheckOptions::default(),
        &CancellationToken::none(),
    )
    .await
    .unwrap_or_else(|e| panic!("decode failed for {tokens:?}: {e}"));
    let decoded = normalize(&decoded).unwrap();
    assert_eq!(
        strip_locations(&program),
        strip_locations(&decoded),
        "nn round-trip failed for {source:?} via {tokens:?}"
    );
}

#[tokio::test]
async fn xkcd_number_allocates_and_roundtrips() {
    let program = prepared("now => @com.xkcd.get_comic(number=42) => notify;").await;
    let s = sentence("get xkcd comic 42");
    let (tokens, entities) = nn::encode(&program, &s).unwrap();

    assert!(tokens.contains(&"NUMBER_0".to_string()), "tokens: {tokens:?}");
    assert_eq!(entities["NUMBER_0"], Value::Number(42.0));

    let decoded = nn::decode(&tokens, &entities).unwrap();
    let rechecked = typecheck(
        &decoded,
        &common::catalogue(),
        &TypecheckOptions::default(),
        &CancellationToken::none(),
    )
    .await
    .unwrap();
    assert_eq!(
        strip_locations(&program),
        strip_locations(&normalize(&rechecked).unwrap())
    );
}

#[tokio::test]
async fn roundtrip_corpus() {
    assert_roundtrip(
        "now => @com.gmail.inbox(), labels == \"work\" => notify;",
        "show me emails labeled work",
    )
    .await;
    assert_roundtrip(
        "monitor @com.twitter.home_timeline() => @com.twitter.post(status=text);",
        "retweet my timeline",
    )
    .await;
    assert_roundtrip(
        "now => sort file_size asc of @com.google.drive.list_drive_files()[1:5] => notify;",
        "show the 5 smallest drive files starting from 1",
    )
    .await;
    assert_roundtrip(
        "now => @com.spotify.play(song=\"spotify:123\"^^com.spotify:song(\"Imagine\"));",
        "play imagine on spotify",
    )
    .await;
    assert_roundtrip(
        "now => @org.thingpedia.weather.current(location=$location.home), temperature >= 5C => notify;",
        "is it warmer than 5 degrees at home",
    )
    .await;
}

#[tokio::test]
async fn consecutive_indices_follow_sentence_order() {
    let program = prepared(
        "now => @com.twitter.search(query=\"cats\"), text =~ \"dogs\" => notify;",
    )
    .await;
    // The sentence mentions "dogs" before "cats": indices follow the
    // sentence, not the program.
    let s = sentence("find dogs in tweets about cats");
    let (tokens, entities) = nn::encode(&program, &s).unwrap();
    assert_eq!(entities["QUOTED_STRING_0"], Value::String("dogs".to_string()));
    assert_eq!(entities["QUOTED_STRING_1"], Value::String("cats".to_string()));
    assert!(tokens.contains(&"QUOTED_STRING_0".to_string()));
    assert!(tokens.contains(&"QUOTED_STRING_1".to_string()));
}

#[tokio::test]
async fn sequential_mode_ignores_the_sentence() {
    let program = prepared(
        "now => @com.twitter.search(query=\"cats\"), text =~ \"dogs\" => notify;",
    )
    .await;
    let s = sentence("completely unrelated words");
    let options = EncodeOptions {
        mode: AllocationMode::Sequential,
        use_slots: false,
    };
    let (_, entities) = nn::encode_with_options(&program, &s, options, None).unwrap();
    // Program order: query=cats comes before the filter on dogs.
    assert_eq!(entities["QUOTED_STRING_0"], Value::String("cats".to_string()));
    assert_eq!(entities["QUOTED_STRING_1"], Value::String("dogs".to_string()));
}

#[tokio::test]
async fn unmatched_literal_is_an_error() {
    let program = prepared("now => @com.xkcd.get_comic(number=42) => notify;").await;
    let s = sentence("get me a comic");
    let err = nn::encode(&program, &s).unwrap_err();
    assert!(matches!(err, Error::UnmatchedLiteral(_)), "got {err:?}");
}

#[tokio::test]
async fn non_consecutive_tolerates_gaps() {
    let program = prepared(
        "now => @com.gmail.inbox(), subject =~ \"quarterly sales report\" => notify;",
    )
    .await;
    let s = sentence("find the quarterly big sales report email");
    let strict = nn::encode(&program, &s);
    assert!(matches!(strict, Err(Error::UnmatchedLiteral(_))));

    let options = EncodeOptions {
        mode: AllocationMode::NonConsecutive,
        use_slots: false,
    };
    let (tokens, entities) = nn::encode_with_options(&program, &s, options, None).unwrap();
    assert!(tokens.contains(&"QUOTED_STRING_0".to_string()));
    assert_eq!(
        entities["QUOTED_STRING_0"],
        Value::String("quarterly sales report".to_string())
    );
}

#[tokio::test]
async fn slots_render_and_resolve() {
    let program = prepared("now => @com.twitter.post(status=$undefined);").await;
    let options = EncodeOptions {
        mode: AllocationMode::Sequential,
        use_slots: true,
    };
    let (tokens, mut entities) =
        nn::encode_with_options(&program, &sentence("tweet something"), options, None).unwrap();
    assert!(tokens.contains(&"SLOT_0".to_string()));

    // Without a dictionary entry the slot decodes back to a hole.
    let decoded = nn::decode(&tokens, &entities).unwrap();
    let holes = thingtalk::ast::iterate_slots(&decoded)
        .filter(|s| s.is_empty())
        .count();
    assert_eq!(holes, 1);

    // Filling the slot in the dictionary fills the program.
    entities.insert("SLOT_0".to_string(), Value::String("hello".to_string()));
    let filled = nn::decode(&tokens, &entities).unwrap();
    let holes = thingtalk::ast::iterate_slots(&filled)
        .filter(|s| s.is_empty())
        .count();
    assert_eq!(holes, 0);
}

#[tokio::test]
async fn permission_rule_roundtrips() {
    let input = parse("true : now => @com.twitter.post;").unwrap();
    let (tokens, entities) = nn::encode(&input, &sentence("anyone may tweet")).unwrap();
    assert_eq!(
        tokens,
        vec!["true", ":", "now", "=>", "@com.twitter.post"]
    );
    let decoded = nn::decode(&tokens, &entities).unwrap();
    assert_eq!(strip_locations(&input), strip_locations(&decoded));
}

#[tokio::test]
async fn legacy_policy_output_wildcard_decodes() {
    let tokens = sentence("true : now => @com.twitter.post => *");
    let decoded = nn::decode(&tokens, &Default::default()).unwrap();
    match decoded {
        Input::Permission(rule) => {
            assert!(matches!(rule.query, thingtalk::ast::PermissionFunction::Builtin));
            assert!(matches!(
                rule.action,
                thingtalk::ast::PermissionFunction::Specified { ref channel, .. } if channel == "post"
            ));
        }
        other => panic!("expected permission, got {other:?}"),
    }
}

#[tokio::test]
async fn bookkeeping_roundtrips() {
    let input = parse("bookkeeping(yes);").unwrap();
    let (tokens, entities) = nn::encode(&input, &sentence("yes")).unwrap();
    assert_eq!(tokens, vec!["bookkeeping", "special", "special:yes"]);
    let decoded = nn::decode(&tokens, &entities).unwrap();
    assert_eq!(strip_locations(&input), strip_locations(&decoded));
}

#[tokio::test]
async fn device_selector_binding_roundtrips() {
    let input = parse("now => @com.twitter(id=\"twitter-foo\").post(status=$undefined);").unwrap();
    let (tokens, entities) =
        nn::encode(&input, &sentence("tweet from my work account")).unwrap();
    assert!(tokens.contains(&"\"".to_string()));
    assert!(tokens.contains(&"twitter-foo".to_string()));
    let decoded = nn::decode(&tokens, &entities).unwrap();
    assert_eq!(strip_locations(&input), strip_locations(&decoded));
}

#[tokio::test]
async fn dates_are_structural() {
    let input = parse("now => @com.xkcd.get_comic(number=new Date(2020, 4, 1)) => notify;");
    // Dates do not typecheck against `number`, so drive the encoder on
    // the unchecked AST: the codec is schema-free.
    let input = input.unwrap();
    let (tokens, entities) = nn::encode(&input, &sentence("april first")).unwrap();
    let rendered = tokens.join(" ");
    assert!(
        rendered.contains("new Date ( 2020 , 4 , 1 )"),
        "tokens: {rendered}"
    );
    assert!(entities.is_empty());
    let decoded = nn::decode(&tokens, &entities).unwrap();
    assert_eq!(strip_locations(&input), strip_locations(&decoded));
}

#[tokio::test]
async fn date_edges_are_structural() {
    let input = parse("now => @com.xkcd.get_comic(number=start_of(week)) => notify;").unwrap();
    let (tokens, _) = nn::encode(&input, &sentence("this week")).unwrap();
    let rendered = tokens.join(" ");
    assert!(rendered.contains("start_of week"), "tokens: {rendered}");
}

#[test]
fn compatibility_rewrites_compose_with_decode() {
    let old_tokens = sentence("now => @com.twitter.post param:status = $undefined");
    let tokens = apply_compatibility(NnSyntaxVersion::parse("1.9").unwrap(), old_tokens);
    let decoded = nn::decode(&tokens, &Default::default()).unwrap();
    let holes = thingtalk::ast::iterate_slots(&decoded)
        .filter(|s| s.is_empty())
        .count();
    assert_eq!(holes, 1);
}

#[tokio::test]
async fn argmax_compat_produces_sort_index() {
    let old_tokens =
        sentence("now => argmax param:file_size of @com.google.drive.list_drive_files => notify");
    let tokens = apply_compatibility(NnSyntaxVersion::parse("1.9").unwrap(), old_tokens);
    let decoded = nn::decode(&tokens, &Default::default()).unwrap();
    let rechecked = typecheck(
        &decoded,
        &common::catalogue(),
        &TypecheckOptions::default(),
        &CancellationToken::none(),
    )
    .await
    .unwrap();
    match rechecked {
        Input::Program(program) => match &program.statements[0] {
            thingtalk::ast::Statement::Command { table: Some(table), .. } => {
                assert!(matches!(table, thingtalk::ast::Table::Index { .. }));
            }
            other => panic!("expected command, got {other:?}"),
        },
        other => panic!("expected program, got {other:?}"),
    }
}
