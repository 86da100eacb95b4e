use chrono::{Duration, Utc};
use margin_core::MarginError;
use margin_core::domain::Note;
use margin_core::search::{FilterCriteria, Query, SearchIndex, filter, intersect_hits};

fn notes() -> Vec<Note> {
    vec![
        Note::new("Alpha", "").with_tags(["a", "b"]).in_notebook("x"),
        Note::new("Beta", "").with_tags(["a"]).in_notebook("y"),
        Note::new("Gamma", "").with_tags(["c"]).in_notebook("x"),
        Note::new("Delta", "").with_tags(["a"]),
    ]
}

fn titles(notes: &[Note]) -> Vec<&str> {
    notes.iter().map(|note| note.title.as_str()).collect()
}

#[test]
fn criteria_compose_with_and() {
    let notes = notes();

    let tags_then_notebook = FilterCriteria::default().with_tags(["a"]).with_notebook("x");
    let notebook_then_tags = FilterCriteria::default().with_notebook("x").with_tags(["a"]);

    let found = filter(&notes, &tags_then_notebook);
    assert_eq!(titles(&found), vec!["Alpha"]);
    assert_eq!(found, filter(&notes, &notebook_then_tags));
}

#[test]
fn tags_match_any_listed_tag() {
    let notes = notes();
    let found = filter(&notes, &FilterCriteria::default().with_tags(["b", "c"]));
    assert_eq!(titles(&found), vec!["Alpha", "Gamma"]);
}

#[test]
fn empty_criteria_keep_everything_in_order() {
    let notes = notes();

    let everything = filter(&notes, &FilterCriteria::default());
    assert_eq!(everything, notes);

    let empty_tags = FilterCriteria::default().with_tags(Vec::<String>::new());
    assert!(empty_tags.is_empty());
    assert_eq!(filter(&notes, &empty_tags).len(), notes.len());
}

#[test]
fn notebook_match_is_exact() {
    let notes = notes();
    assert!(filter(&notes, &FilterCriteria::default().with_notebook("X")).is_empty());
}

#[test]
fn date_range_is_inclusive_on_updated_at() {
    let mut notes = notes();
    let pivot = Utc::now();
    notes[0].updated_at = pivot;
    notes[1].updated_at = pivot + Duration::days(1);
    notes[2].updated_at = pivot + Duration::days(3);
    notes[3].updated_at = pivot - Duration::days(1);
    for note in notes.iter_mut() {
        note.created_at = note.updated_at.min(note.created_at);
    }

    let criteria = FilterCriteria::default().with_date_range(pivot, pivot + Duration::days(1));
    let found = filter(&notes, &criteria);
    assert_eq!(titles(&found), vec!["Alpha", "Beta"]);
}

#[test]
fn filtering_never_mutates_input() {
    let notes = notes();
    let before = notes.clone();
    let _ = filter(&notes, &FilterCriteria::default().with_tags(["a"]));
    assert_eq!(notes, before);
}

#[test]
fn search_hits_intersect_with_filters() -> Result<(), MarginError> {
    let notes = vec![
        Note::new("Weekly report", "").in_notebook("work"),
        Note::new("Report card", "").in_notebook("school"),
    ];
    let index = SearchIndex::build(&notes)?;
    let hits = Query::new(&index).search("report").results;
    assert_eq!(hits.len(), 2);

    let kept = intersect_hits(hits, &FilterCriteria::default().with_notebook("school"));
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].note.title, "Report card");

    Ok(())
}

#[test]
fn criteria_use_camel_case_on_the_wire() -> Result<(), serde_json::Error> {
    let criteria: FilterCriteria = serde_json::from_str(
        r#"{"tags":["a"],"notebookId":"x","dateRange":{"start":"2024-01-01T00:00:00Z","end":"2024-12-31T00:00:00Z"}}"#,
    )?;
    assert_eq!(criteria.notebook_id.as_deref(), Some("x"));
    assert!(criteria.date_range.is_some());
    Ok(())
}
