//! Shared test catalogue: a small in-memory Thingpedia.

use thingtalk::ast::{ArgDirection, ArgumentDef, ClassDef, FunctionDef, FunctionKind};
use thingtalk::schema::MemorySchemaRetriever;
use thingtalk::types::Type;

fn arg(name: &str, direction: ArgDirection, ty: Type) -> ArgumentDef {
    ArgumentDef::new(name, direction, ty)
}

pub fn catalogue() -> MemorySchemaRetriever {
    let retriever = MemorySchemaRetriever::new();

    let mut xkcd = ClassDef::new("com.xkcd");
    let mut get_comic = FunctionDef::new(FunctionKind::Query, "get_comic").with_args(vec![
        arg("number", ArgDirection::InOpt, Type::Number),
        arg("title", ArgDirection::Out, Type::string()),
        arg(
            "picture_url",
            ArgDirection::Out,
            Type::Entity("tt:picture".to_string()),
        ),
    ]);
    get_comic.is_monitorable = true;
    xkcd.add_function(get_comic);
    retriever.add_class(xkcd);

    let mut twitter = ClassDef::new("com.twitter");
    let mut home_timeline = FunctionDef::new(FunctionKind::Query, "home_timeline").with_args(vec![
        arg("text", ArgDirection::Out, Type::string()),
        arg(
            "author",
            ArgDirection::Out,
            Type::Entity("tt:username".to_string()),
        ),
    ]);
    home_timeline.is_list = true;
    home_timeline.is_monitorable = true;
    twitter.add_function(home_timeline);
    let mut search = FunctionDef::new(FunctionKind::Query, "search").with_args(vec![
        arg("query", ArgDirection::InOpt, Type::string()),
        arg("text", ArgDirection::Out, Type::string()),
        arg(
            "author",
            ArgDirection::Out,
            Type::Entity("tt:username".to_string()),
        ),
    ]);
    search.is_list = true;
    search.is_monitorable = true;
    twitter.add_function(search);
    twitter.add_function(
        FunctionDef::new(FunctionKind::Action, "post").with_args(vec![arg(
            "status",
            ArgDirection::InReq,
            Type::string(),
        )]),
    );
    retriever.add_class(twitter);

    let mut gmail = ClassDef::new("com.gmail");
    let mut inbox = FunctionDef::new(FunctionKind::Query, "inbox").with_args(vec![
        arg("subject", ArgDirection::Out, Type::string()),
        arg("labels", ArgDirection::Out, Type::string()),
        arg(
            "sender",
            ArgDirection::Out,
            Type::Entity("tt:email_address".to_string()),
        ),
        arg(
            "recipients",
            ArgDirection::Out,
            Type::array(Type::string()),
        ),
    ]);
    inbox.is_list = true;
    inbox.is_monitorable = true;
    gmail.add_function(inbox);
    retriever.add_class(gmail);

    let mut drive = ClassDef::new("com.google.drive");
    let mut list_files = FunctionDef::new(FunctionKind::Query, "list_drive_files").with_args(vec![
        arg(
            "id",
            ArgDirection::Out,
            Type::Entity("com.google.drive:file_id".to_string()),
        ),
        arg("file_name", ArgDirection::Out, Type::string()),
        arg(
            "file_size",
            ArgDirection::Out,
            Type::Measure("byte".to_string()),
        ),
    ]);
    list_files.is_list = true;
    list_files.is_monitorable = true;
    drive.add_function(list_files);
    retriever.add_class(drive);

    let mut weather = ClassDef::new("org.thingpedia.weather");
    let mut current = FunctionDef::new(FunctionKind::Query, "current").with_args(vec![
        arg("location", ArgDirection::InReq, Type::Location),
        arg(
            "temperature",
            ArgDirection::Out,
            Type::Measure("C".to_string()),
        ),
    ]);
    current.is_monitorable = true;
    weather.add_function(current);
    retriever.add_class(weather);

    let mut spotify = ClassDef::new("com.spotify");
    spotify.add_function(
        FunctionDef::new(FunctionKind::Action, "play").with_args(vec![arg(
            "song",
            ArgDirection::InReq,
            Type::Entity("com.spotify:song".to_string()),
        )]),
    );
    retriever.add_class(spotify);

    retriever
}
