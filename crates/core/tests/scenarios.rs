//! End-to-end seed scenarios from spec.md §8 ("Concrete scenarios"). Each builds a tiny
//! on-disk vault, runs a real reindex and a real query through [`temoa_core::pipeline`],
//! and asserts the documented behavior.
//!
//! These exercise the real bi-encoder/cross-encoder (`fastembed`, downloading model
//! weights from Hugging Face on first run), so they are marked `#[ignore]` and run with
//! `cargo test -- --ignored` in an environment with network access and the `semantic`
//! feature enabled, the same way a model-dependent suite would in CI.

mod helpers;

use std::collections::BTreeMap;

use helpers::TestVault;
use temoa_core::pipeline::{self, SearchContext, SearchRequest};
use temoa_core::profile::SearchProfile;
use temoa_core::{bm25::Bm25Index, status, types::GleaningStatus};

fn run_query(vault: &TestVault, query: &str, profile: &SearchProfile, request_overrides: SearchRequest) -> pipeline::SearchResponse {
    let (store, _) = vault.reindex().expect("reindex failed");
    let bm25 = Bm25Index::build(&store.metadata, 5.0);
    let gleaning_status = status::load(vault.root());
    let ctx = SearchContext {
        store: &store,
        bm25: &bm25,
        bi_encoder: vault.bi_encoder().as_ref(),
        cross_encoder: Some(vault.cross_encoder().as_ref()),
        gleaning_status: &gleaning_status,
        vault_root: vault.root(),
    };
    let request = SearchRequest { query: query.to_string(), ..request_overrides };
    pipeline::run(&ctx, "default", profile, &request, chrono::Utc::now(), 8_000).expect("search failed")
}

#[test]
#[ignore = "downloads the bge-small-en-v1.5 embedding model from Hugging Face on first run"]
fn s1_basic_semantic_search() {
    let vault = TestVault::new();
    vault.write("obsidian-tools.md", "---\ntags: [obsidian, tools]\n---\nA roundup of useful Obsidian plugins for note-taking.\n");

    let profile = SearchProfile::default_profile();
    let response = run_query(
        &vault,
        "obsidian",
        &profile,
        SearchRequest { hybrid: Some(false), rerank: Some(false), ..Default::default() },
    );

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].relative_path, "obsidian-tools.md");
    assert!(response.results[0].similarity_score.unwrap() > 0.3);
}

#[test]
#[ignore = "downloads the bge-small-en-v1.5 embedding model from Hugging Face on first run"]
fn s2_tag_boost_in_hybrid_mode() {
    let vault = TestVault::new();
    vault.write(
        "a.md",
        "---\ntags: [zettelkasten, book]\n---\nNotes on organizing a personal knowledge base.\n",
    );
    vault.write(
        "b.md",
        &"zettelkasten ".repeat(10),
    );

    let profile = SearchProfile::default_profile(); // hybrid_enabled = true, rerank off
    let response = run_query(&vault, "zettelkasten books", &profile, SearchRequest::default());

    let a_rank = response.results.iter().position(|r| r.relative_path == "a.md");
    let b_rank = response.results.iter().position(|r| r.relative_path == "b.md");
    assert!(a_rank.is_some() && b_rank.is_some(), "both notes should be present");
    assert!(a_rank < b_rank, "tag-matched note should outrank keyword-repetition note");
    assert!(response.results[a_rank.unwrap()].tag_boosted);
}

#[test]
#[ignore = "downloads the bge-small-en-v1.5 embedding model from Hugging Face on first run"]
fn s3_chunk_dedup_returns_one_result_for_the_matching_chunk() {
    let vault = TestVault::new();
    // ~6000 characters so the chunker (threshold 4000) produces 3 chunks; bury the
    // target phrase in the middle third.
    let first_third = "unrelated filler text ".repeat(140);
    let middle_third = format!("{} the Forsyte Saga is mentioned here. {}", "more filler ".repeat(60), "padding ".repeat(60));
    let last_third = "trailing filler text ".repeat(140);
    vault.write("long-note.md", &format!("{first_third}\n\n{middle_third}\n\n{last_third}"));

    let mut profile = SearchProfile::deep();
    profile.max_results_per_file = 1;

    let response = run_query(&vault, "Forsyte Saga", &profile, SearchRequest::default());

    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0];
    assert_eq!(hit.relative_path, "long-note.md");
    assert_eq!(hit.chunk_total, 3);
    assert!(hit.matched_chunks >= 1);
}

#[test]
#[ignore = "downloads the bge-small-en-v1.5 embedding model from Hugging Face on first run"]
fn s4_time_boost_ranks_recent_note_above_older_equally_similar_note() {
    let vault = TestVault::new();
    vault.write("recent.md", "Notes on brewing pour-over coffee at home.\n");
    vault.write("old.md", "Notes on brewing pour-over coffee at home, written a while back.\n");
    vault.set_mtime_days_ago("old.md", 365);

    let profile = SearchProfile::default_profile();
    let response = run_query(
        &vault,
        "brewing pour-over coffee",
        &profile,
        SearchRequest { hybrid: Some(false), rerank: Some(false), time_boost: Some(true), ..Default::default() },
    );

    let recent_rank = response.results.iter().position(|r| r.relative_path == "recent.md");
    let old_rank = response.results.iter().position(|r| r.relative_path == "old.md");
    assert!(recent_rank.is_some() && old_rank.is_some(), "both notes should be present");
    assert!(recent_rank < old_rank, "recently modified note should outrank the year-old one");
    assert!(response.results[recent_rank.unwrap()].time_boost_factor.unwrap() > 0.0);
}

#[test]
#[ignore = "downloads the bge-small-en-v1.5 embedding model from Hugging Face on first run"]
fn s5_status_filter_drops_inactive_gleanings() {
    let vault = TestVault::new();
    vault.write("g1.md", "---\ngleaning_id: g1\n---\nA saved link about rust async runtimes.\n");
    vault.write("g2.md", "---\ngleaning_id: g2\n---\nAnother saved link about rust async runtimes.\n");
    status::set_status(vault.root(), "g2", GleaningStatus::Inactive, "superseded").unwrap();

    let profile = SearchProfile::default_profile();
    let response = run_query(&vault, "rust async runtimes", &profile, SearchRequest::default());

    let paths: Vec<&str> = response.results.iter().map(|r| r.relative_path.as_str()).collect();
    assert!(paths.contains(&"g1.md"));
    assert!(!paths.contains(&"g2.md"));
}

#[test]
#[ignore = "downloads the bge-small-en-v1.5 embedding model from Hugging Face on first run"]
fn s6_incremental_reindex_matches_full_rebuild_modulo_row_order() {
    let vault = TestVault::new();
    vault.write("keep.md", "This file is never touched.\n");
    vault.write("modify-me.md", "Original content before the edit.\n");
    vault.write("delete-me.md", "This file will be removed before the incremental run.\n");

    let (store_v0, _) = vault.reindex().unwrap();
    assert_eq!(store_v0.rows(), 3);

    vault.write("new.md", "A brand new note added after the first index.\n");
    vault.write("modify-me.md", "Completely different content after the edit.\n");
    std::fs::remove_file(vault.root().join("delete-me.md")).unwrap();

    let (incremental, stats) = vault.reindex().unwrap();
    assert_eq!(stats.files_added, 1);
    assert_eq!(stats.files_modified, 1);
    assert_eq!(stats.files_deleted, 1);

    let mut incremental_paths: BTreeMap<&str, usize> = BTreeMap::new();
    for m in &incremental.metadata {
        *incremental_paths.entry(m.file_path.as_str()).or_insert(0) += 1;
    }
    assert!(incremental_paths.contains_key("keep.md"));
    assert!(incremental_paths.contains_key("modify-me.md"));
    assert!(incremental_paths.contains_key("new.md"));
    assert!(!incremental_paths.contains_key("delete-me.md"));

    // file_tracking positions are dense and self-consistent after the merge (invariant 1).
    for (path, entry) in &incremental.file_tracking {
        for &row in &entry.positions {
            assert_eq!(&incremental.metadata[row].file_path, path);
        }
    }
}
