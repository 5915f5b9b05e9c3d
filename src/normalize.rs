//! Record normalizer.
//!
//! Converts raw JSON items of varying shape into [`CanonicalRecord`]s. Each
//! category owns an ordered list of [`Matcher`]s (a predicate plus an
//! extractor); the first matcher whose predicate accepts the item wins.
//! Precedence is therefore the order of the lists below, nothing else.
//!
//! | Category | Matchers, in order |
//! |----------|--------------------|
//! | legal | title+output → QA pair → task info → body+summary → raw sentences |
//! | patent | patent abstract → QA pair → body+summary |
//!
//! Metadata uses one fixed key set per category. Keys whose source field is
//! absent are kept with a `null` value, so every record of a category (and
//! therefore of each task) has the same payload schema.
//!
//! Everything here is pure: no I/O, no clock, no randomness.

use serde_json::{Map, Value};

use crate::models::{CanonicalRecord, Category, MetaValue, Metadata, Task};

/// Why an item produced no record. Skips are counted, never escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The array element is not a JSON object.
    NotAnObject,
    /// No matcher of the category accepted the item.
    SchemaMismatch,
    /// A matcher accepted the item but every textual field was empty.
    EmptyText,
}

/// File-level context extracted opportunistically from the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub file_name: String,
    pub sub_type: Option<String>,
    pub lang: Option<String>,
}

impl SourceInfo {
    /// `sub_type` is the second `_`-separated token of the stem
    /// (`case_civil_kr.json` → `civil`); `lang` is `kr` when the name
    /// contains that tag.
    pub fn from_file_name(file_name: &str) -> Self {
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name);
        let sub_type = stem
            .split('_')
            .nth(1)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let lang = file_name
            .to_ascii_lowercase()
            .contains("kr")
            .then(|| "kr".to_string());
        Self {
            file_name: file_name.to_string(),
            sub_type,
            lang,
        }
    }
}

type Object = Map<String, Value>;

/// A labelled line of embedded text.
type Line = (&'static str, Option<String>);

/// One known item shape.
pub struct Matcher {
    pub name: &'static str,
    pub task: Task,
    predicate: fn(&Object) -> bool,
    extract: fn(&Object, &mut Metadata) -> Vec<Line>,
}

impl Matcher {
    pub fn matches(&self, obj: &Object) -> bool {
        (self.predicate)(obj)
    }
}

const COMMON_KEYS: &[&str] = &["category", "task", "file", "sub_type", "lang"];

const LEGAL_KEYS: &[&str] = &[
    "title",
    "output",
    "question",
    "answer",
    "content",
    "summary",
    "response_institute",
    "response_date",
    "sentences",
    "file_section",
];

const PATENT_KEYS: &[&str] = &[
    "title",
    "invention_title",
    "abstract",
    "keyword",
    "claims",
    "register_date",
    "open_date",
    "application_date",
    "document_id",
    "question",
    "answer",
    "content",
    "summary",
];

const LEGAL_MATCHERS: &[Matcher] = &[
    Matcher {
        name: "title+output",
        task: Task::LegalSummary,
        predicate: has_title_or_output,
        extract: extract_title_output,
    },
    Matcher {
        name: "qa-pair",
        task: Task::LegalQa,
        predicate: has_qa_pair,
        extract: extract_qa_pair,
    },
    Matcher {
        name: "task-info",
        task: Task::LegalQa,
        predicate: has_task_info,
        extract: extract_task_info,
    },
    Matcher {
        name: "body+summary",
        task: Task::LegalSummary,
        predicate: has_body_summary,
        extract: extract_body_summary,
    },
    Matcher {
        name: "sentences",
        task: Task::LegalSummary,
        predicate: has_sentences,
        extract: extract_sentences,
    },
];

const PATENT_MATCHERS: &[Matcher] = &[
    Matcher {
        name: "patent-abstract",
        task: Task::PatentAbs,
        predicate: has_patent_abstract,
        extract: extract_patent_abstract,
    },
    Matcher {
        name: "qa-pair",
        task: Task::Qa,
        predicate: has_qa_pair,
        extract: extract_qa_pair,
    },
    Matcher {
        name: "body+summary",
        task: Task::Summary,
        predicate: has_body_summary,
        extract: extract_body_summary,
    },
];

/// Matchers of a category in precedence order.
pub fn matchers(category: Category) -> &'static [Matcher] {
    match category {
        Category::Legal => LEGAL_MATCHERS,
        Category::Patent => PATENT_MATCHERS,
    }
}

/// The full metadata key set of a category.
pub fn schema_keys(category: Category) -> impl Iterator<Item = &'static str> {
    let specific = match category {
        Category::Legal => LEGAL_KEYS,
        Category::Patent => PATENT_KEYS,
    };
    COMMON_KEYS.iter().chain(specific.iter()).copied()
}

/// Normalize one item, or `None` if it must be skipped.
pub fn normalize(item: &Value, category: Category, source: &SourceInfo) -> Option<CanonicalRecord> {
    normalize_item(item, category, source).ok()
}

/// Like [`normalize`], but reports why an item was skipped.
pub fn normalize_item(
    item: &Value,
    category: Category,
    source: &SourceInfo,
) -> Result<CanonicalRecord, SkipReason> {
    let obj = item.as_object().ok_or(SkipReason::NotAnObject)?;
    let matcher = matchers(category)
        .iter()
        .find(|m| m.matches(obj))
        .ok_or(SkipReason::SchemaMismatch)?;

    let mut metadata: Metadata = schema_keys(category).map(|k| (k.to_string(), None)).collect();
    set_text(&mut metadata, "category", Some(category.as_str().to_string()));
    set_text(&mut metadata, "task", Some(matcher.task.as_str().to_string()));
    set_text(&mut metadata, "file", Some(source.file_name.clone()));
    set_text(&mut metadata, "sub_type", source.sub_type.clone());
    set_text(&mut metadata, "lang", source.lang.clone());

    let lines = (matcher.extract)(obj, &mut metadata);
    match category {
        Category::Legal => legal_context(obj, &mut metadata),
        Category::Patent => patent_context(obj, &mut metadata),
    }

    let text = lines
        .into_iter()
        .filter_map(|(label, value)| value.map(|v| format!("{} {}", label, v)))
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        return Err(SkipReason::EmptyText);
    }

    Ok(CanonicalRecord {
        text,
        category,
        task: matcher.task,
        metadata,
    })
}

// ============ Predicates ============

fn has_title_or_output(obj: &Object) -> bool {
    text_of(obj, "title").is_some() || text_of(obj, "output").is_some()
}

fn has_qa_pair(obj: &Object) -> bool {
    (obj.contains_key("질문") && obj.contains_key("답변"))
        || (obj.contains_key("question") && obj.contains_key("answer"))
}

fn has_task_info(obj: &Object) -> bool {
    obj.get("taskinfo")
        .and_then(Value::as_object)
        .is_some_and(|info| info.contains_key("input") && info.contains_key("output"))
}

fn has_body_summary(obj: &Object) -> bool {
    (obj.contains_key("본문") && obj.contains_key("요약"))
        || (obj.contains_key("body") && obj.contains_key("summary"))
}

/// Raw judgment documents: a `sentences` array and nothing else we know.
fn has_sentences(obj: &Object) -> bool {
    text_of(obj, "sentences").is_some()
}

fn has_patent_abstract(obj: &Object) -> bool {
    invention_title(obj).is_some() || text_of(obj, "abstract").is_some() || keywords(obj).is_some()
}

// ============ Extractors ============

fn extract_title_output(obj: &Object, meta: &mut Metadata) -> Vec<Line> {
    let title = text_of(obj, "title");
    let output = text_of(obj, "output");
    set_text(meta, "title", title.clone());
    set_text(meta, "output", output.clone());
    vec![("[제목]", title), ("[요약]", output)]
}

fn extract_qa_pair(obj: &Object, meta: &mut Metadata) -> Vec<Line> {
    let question = first_text(obj, &["질문", "question"]);
    let answer = first_text(obj, &["답변", "answer"]);
    set_text(meta, "question", question.clone());
    set_text(meta, "answer", answer.clone());
    vec![("[질문]", question), ("[답변]", answer)]
}

fn extract_task_info(obj: &Object, meta: &mut Metadata) -> Vec<Line> {
    let empty = Map::new();
    let info = obj
        .get("taskinfo")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let question = text_of(info, "input");
    let answer = text_of(info, "output");
    set_text(meta, "question", question.clone());
    set_text(meta, "answer", answer.clone());
    vec![("[질문]", question), ("[답변]", answer)]
}

fn extract_body_summary(obj: &Object, meta: &mut Metadata) -> Vec<Line> {
    let content = first_text(obj, &["본문", "body"]);
    let summary = first_text(obj, &["요약", "summary"]);
    set_text(meta, "content", content.clone());
    set_text(meta, "summary", summary.clone());
    vec![("[본문]", content), ("[요약]", summary)]
}

fn extract_sentences(obj: &Object, meta: &mut Metadata) -> Vec<Line> {
    let content = text_of(obj, "sentences");
    set_text(meta, "content", content.clone());
    vec![("[본문]", content)]
}

fn extract_patent_abstract(obj: &Object, meta: &mut Metadata) -> Vec<Line> {
    let title = invention_title(obj);
    let abstract_text = text_of(obj, "abstract");
    let keyword_list = keywords(obj);
    let keyword_line = keyword_list.as_ref().map(|kw| kw.join(", "));

    set_text(meta, "invention_title", title.clone());
    set_text(meta, "abstract", abstract_text.clone());
    meta.insert("keyword".to_string(), keyword_list.map(MetaValue::List));

    vec![
        ("[발명의명칭]", title),
        ("[요약]", abstract_text),
        ("[주요키워드]", keyword_line),
    ]
}

// ============ Category context ============

fn legal_context(obj: &Object, meta: &mut Metadata) {
    if meta.get("title").is_some_and(Option::is_none) {
        set_text(meta, "title", text_of(obj, "title"));
    }
    set_text(meta, "response_institute", text_of(obj, "response_institute"));
    set_text(meta, "response_date", text_of(obj, "response_date"));
    set_value(meta, "sentences", obj.get("sentences"));
    set_text(meta, "file_section", text_of(obj, "section"));
}

fn patent_context(obj: &Object, meta: &mut Metadata) {
    let title = text_of(obj, "title").or_else(|| invention_title(obj));
    set_text(meta, "title", title);
    set_text(meta, "register_date", text_of(obj, "register_date"));
    set_text(meta, "open_date", text_of(obj, "open_date"));
    set_text(meta, "application_date", text_of(obj, "application_date"));
    set_text(
        meta,
        "document_id",
        first_text(obj, &["documentId", "document_id"]),
    );
    let claims = match obj.get("claims") {
        Some(Value::Array(items)) => {
            let lines: Vec<String> = items.iter().filter_map(scalar_text).collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        Some(other) => scalar_text(other),
        None => None,
    };
    set_text(meta, "claims", claims);
}

// ============ Field helpers ============

fn invention_title(obj: &Object) -> Option<String> {
    text_of(obj, "invention_title").or_else(|| text_of(obj, "title"))
}

/// Keywords as a list, whether the source holds an array or a single string.
fn keywords(obj: &Object) -> Option<Vec<String>> {
    match obj.get("keyword")? {
        Value::Array(items) => {
            let list: Vec<String> = items.iter().filter_map(scalar_text).collect();
            (!list.is_empty()).then_some(list)
        }
        other => scalar_text(other).map(|s| vec![s]),
    }
}

fn text_of(obj: &Object, key: &str) -> Option<String> {
    obj.get(key).and_then(scalar_text)
}

fn first_text(obj: &Object, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| text_of(obj, k))
}

/// Trimmed, non-empty text of a scalar (or a list of scalars joined by
/// spaces). Objects and nulls yield nothing.
fn scalar_text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null | Value::Object(_) => String::new(),
    };
    (!s.is_empty()).then_some(s)
}

fn set_text(meta: &mut Metadata, key: &str, value: Option<String>) {
    debug_assert!(meta.contains_key(key), "metadata key '{}' not in schema", key);
    meta.insert(key.to_string(), value.map(MetaValue::Text));
}

fn set_value(meta: &mut Metadata, key: &str, value: Option<&Value>) {
    let converted = match value {
        Some(Value::Array(items)) => {
            let list: Vec<String> = items.iter().filter_map(scalar_text).collect();
            (!list.is_empty()).then_some(MetaValue::List(list))
        }
        Some(other) => scalar_text(other).map(MetaValue::Text),
        None => None,
    };
    debug_assert!(meta.contains_key(key), "metadata key '{}' not in schema", key);
    meta.insert(key.to_string(), converted);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> SourceInfo {
        SourceInfo::from_file_name("case_civil_kr.json")
    }

    fn text(meta: &Metadata, key: &str) -> Option<String> {
        match meta.get(key).cloned().flatten() {
            Some(MetaValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    #[test]
    fn legal_title_output_is_summary() {
        let r = normalize(&json!({"title": "T", "output": "O"}), Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalSummary);
        assert!(r.text.contains('T'));
        assert!(r.text.contains('O'));
        assert_eq!(r.text, "[제목] T\n[요약] O");
        assert_eq!(text(&r.metadata, "title").as_deref(), Some("T"));
        assert_eq!(text(&r.metadata, "output").as_deref(), Some("O"));
    }

    #[test]
    fn legal_title_output_wins_over_qa() {
        let item = json!({"title": "T", "output": "", "질문": "Q", "답변": "A"});
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalSummary);
    }

    #[test]
    fn legal_qa_pair() {
        let item = json!({"질문": "상표권 침해인가요?", "답변": "예"});
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalQa);
        assert_eq!(r.text, "[질문] 상표권 침해인가요?\n[답변] 예");
        assert_eq!(text(&r.metadata, "question").as_deref(), Some("상표권 침해인가요?"));
    }

    #[test]
    fn legal_english_aliases() {
        let item = json!({"question": "Q", "answer": "A"});
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalQa);
        let item = json!({"body": "B", "summary": "S"});
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalSummary);
        assert_eq!(r.text, "[본문] B\n[요약] S");
    }

    #[test]
    fn legal_task_info() {
        let item = json!({"taskinfo": {"input": "Q", "output": "A"}});
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalQa);
        assert!(r.text.contains('Q') && r.text.contains('A'));
    }

    #[test]
    fn legal_task_info_needs_output() {
        let item = json!({"taskinfo": {"input": "Q"}});
        assert_eq!(
            normalize_item(&item, Category::Legal, &source()).unwrap_err(),
            SkipReason::SchemaMismatch
        );
    }

    #[test]
    fn legal_raw_sentences_document() {
        let item = json!({"sentences": ["판결 문장 1", "판결 문장 2"], "response_institute": "대법원"});
        let r = normalize_item(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalSummary);
        assert_eq!(r.text, "[본문] 판결 문장 1 판결 문장 2");
        assert_eq!(text(&r.metadata, "content").as_deref(), Some("판결 문장 1 판결 문장 2"));
        assert_eq!(
            r.metadata["sentences"],
            Some(MetaValue::List(vec!["판결 문장 1".into(), "판결 문장 2".into()]))
        );
        assert_eq!(text(&r.metadata, "response_institute").as_deref(), Some("대법원"));
    }

    #[test]
    fn sentences_rank_below_other_legal_shapes() {
        let item = json!({"본문": "B", "요약": "S", "sentences": ["s1"]});
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.text, "[본문] B\n[요약] S");
        // patent has no raw-sentences shape
        assert_eq!(
            normalize_item(&json!({"sentences": ["s1"]}), Category::Patent, &source()).unwrap_err(),
            SkipReason::SchemaMismatch
        );
    }

    #[test]
    fn legal_body_summary_with_context() {
        let item = json!({
            "본문": "판결 본문",
            "요약": "판결 요약",
            "response_institute": "특허법원",
            "response_date": 20210101,
            "sentences": ["s1", "s2"],
            "section": "III"
        });
        let r = normalize(&item, Category::Legal, &source()).unwrap();
        assert_eq!(r.task, Task::LegalSummary);
        assert_eq!(text(&r.metadata, "response_institute").as_deref(), Some("특허법원"));
        assert_eq!(text(&r.metadata, "response_date").as_deref(), Some("20210101"));
        assert_eq!(text(&r.metadata, "file_section").as_deref(), Some("III"));
        assert_eq!(
            r.metadata["sentences"],
            Some(MetaValue::List(vec!["s1".into(), "s2".into()]))
        );
    }

    #[test]
    fn patent_abstract_with_keywords() {
        let item = json!({"invention_title": "X", "abstract": "", "keyword": ["a", "b"]});
        let r = normalize(&item, Category::Patent, &source()).unwrap();
        assert_eq!(r.task, Task::PatentAbs);
        assert!(r.text.contains("a, b"));
        assert!(r.text.contains('X'));
        assert!(!r.text.contains("[요약]"));
        assert_eq!(r.metadata["abstract"], None);
        assert_eq!(
            r.metadata["keyword"],
            Some(MetaValue::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(text(&r.metadata, "title").as_deref(), Some("X"));
    }

    #[test]
    fn patent_context_fields() {
        let item = json!({
            "title": "T",
            "abstract": "A",
            "keyword": "single",
            "documentId": "KR1020200001",
            "claims": ["c1", "c2"],
            "register_date": "2020-01-01"
        });
        let r = normalize(&item, Category::Patent, &source()).unwrap();
        assert_eq!(r.text, "[발명의명칭] T\n[요약] A\n[주요키워드] single");
        assert_eq!(text(&r.metadata, "document_id").as_deref(), Some("KR1020200001"));
        assert_eq!(text(&r.metadata, "claims").as_deref(), Some("c1\nc2"));
        assert_eq!(text(&r.metadata, "register_date").as_deref(), Some("2020-01-01"));
        assert_eq!(r.metadata["open_date"], None);
    }

    #[test]
    fn patent_falls_back_to_generic_shapes() {
        let r = normalize(&json!({"질문": "Q", "답변": "A"}), Category::Patent, &source()).unwrap();
        assert_eq!(r.task, Task::Qa);
        let r = normalize(&json!({"본문": "B", "요약": "S"}), Category::Patent, &source()).unwrap();
        assert_eq!(r.task, Task::Summary);
    }

    #[test]
    fn unknown_shape_is_schema_mismatch() {
        let err = normalize_item(&json!({"foo": "bar"}), Category::Legal, &source()).unwrap_err();
        assert_eq!(err, SkipReason::SchemaMismatch);
        assert!(normalize(&json!({"foo": "bar"}), Category::Patent, &source()).is_none());
    }

    #[test]
    fn non_object_items_are_skipped() {
        for item in [json!("text"), json!(3), json!(null), json!([1, 2])] {
            assert_eq!(
                normalize_item(&item, Category::Legal, &source()).unwrap_err(),
                SkipReason::NotAnObject
            );
        }
    }

    #[test]
    fn empty_fields_are_empty_text() {
        let err = normalize_item(&json!({"질문": "", "답변": "  "}), Category::Legal, &source())
            .unwrap_err();
        assert_eq!(err, SkipReason::EmptyText);
        // all patent fields empty: no matcher accepts it
        let item = json!({"invention_title": "", "abstract": "", "keyword": []});
        assert_eq!(
            normalize_item(&item, Category::Patent, &source()).unwrap_err(),
            SkipReason::SchemaMismatch
        );
    }

    #[test]
    fn metadata_schema_is_stable_per_category() {
        for category in Category::ALL {
            let expected: Vec<&str> = {
                let mut keys: Vec<&str> = schema_keys(category).collect();
                keys.sort();
                keys.dedup();
                keys
            };
            let items = [
                json!({"title": "T", "output": "O"}),
                json!({"질문": "Q", "답변": "A"}),
                json!({"본문": "B", "요약": "S"}),
                json!({"invention_title": "X"}),
                json!({"sentences": ["s1", "s2"]}),
            ];
            for item in items {
                if let Some(r) = normalize(&item, category, &source()) {
                    let keys: Vec<&str> = r.metadata.keys().map(String::as_str).collect();
                    assert_eq!(keys, expected, "category {} item {}", category, item);
                }
            }
        }
    }

    #[test]
    fn source_info_from_file_name() {
        let s = SourceInfo::from_file_name("kr_civil_2021.json");
        assert_eq!(s.sub_type.as_deref(), Some("civil"));
        assert_eq!(s.lang.as_deref(), Some("kr"));
        let s = SourceInfo::from_file_name("decisions.json");
        assert_eq!(s.sub_type, None);
        assert_eq!(s.lang, None);
    }

    #[test]
    fn text_contains_every_non_empty_field() {
        let item = json!({"invention_title": "발명", "abstract": "요지", "keyword": ["k1", "k2", "k3"]});
        let r = normalize(&item, Category::Patent, &source()).unwrap();
        for needle in ["발명", "요지", "k1, k2, k3"] {
            assert!(r.text.contains(needle), "missing {} in {}", needle, r.text);
        }
    }
}
