//! Scenario tests driving streamlets through the tap harness.

use super::*;
use crate::commit::RetryConfig;
use crate::config::{CommitterSettings, OutputMode, StreamletSettings};
use crate::errors::{MalformedRecord, ShapeMismatchError, StreamletError};
use crate::shape::{Inlet, Outlet, Shape};
use crate::stages::{Streamlet, StreamletLogic};
use crate::stream::AggregateRow;
use pretty_assertions::assert_eq;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct OddFilter {
    input: Inlet<u64>,
    output: Outlet<u64>,
}

impl OddFilter {
    fn new() -> Self {
        Self {
            input: Inlet::new("in"),
            output: Outlet::new("out"),
        }
    }
}

impl Streamlet for OddFilter {
    fn shape(&self) -> Result<Shape, ShapeMismatchError> {
        Shape::builder().inlet(&self.input).outlet(&self.output).build()
    }

    fn create_logic(&self) -> StreamletLogic {
        StreamletLogic::process(&self.input, &self.output, |v: u64| (v % 2 == 1).then_some(v))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Person {
    name: String,
    city: String,
}

/// Selects the name of each person, in plain mode.
#[derive(Debug)]
struct SelectName {
    input: Inlet<Person>,
    output: Outlet<String>,
}

impl Streamlet for SelectName {
    fn shape(&self) -> Result<Shape, ShapeMismatchError> {
        Shape::builder().inlet(&self.input).outlet(&self.output).build()
    }

    fn create_logic(&self) -> StreamletLogic {
        let input = self.input.clone();
        let output = self.output.clone();
        StreamletLogic::graph(move |ctx| {
            let names = ctx
                .plain_source(&input)?
                .filter(|p: &Person| !p.city.is_empty())
                .map(|p| p.name);
            Ok(names.to(ctx.plain_sink(&output)?))
        })
    }
}

/// Counts words per micro-batch of three.
#[derive(Debug)]
struct WordCount {
    input: Inlet<String>,
    output: Outlet<AggregateRow<u64>>,
}

impl WordCount {
    fn new() -> Self {
        Self {
            input: Inlet::new("words"),
            output: Outlet::new("counts"),
        }
    }
}

impl Streamlet for WordCount {
    fn shape(&self) -> Result<Shape, ShapeMismatchError> {
        Shape::builder().inlet(&self.input).outlet(&self.output).build()
    }

    fn create_logic(&self) -> StreamletLogic {
        let input = self.input.clone();
        let output = self.output.clone();
        StreamletLogic::graph(move |ctx| {
            let store = ctx.state_store();
            let mode = ctx.settings().output_mode;
            let rows = ctx
                .source_with_context(&input)?
                .aggregate(store, 3, mode, String::clone, |count: Option<u64>, _| {
                    count.unwrap_or(0) + 1
                })
                .map_concat(|rows| rows);
            Ok(rows.to(ctx.committable_sink(&output)?))
        })
    }
}

/// Parses numbers, routing unparseable input to an invalid outlet.
#[derive(Debug)]
struct ParseNumbers {
    input: Inlet<String>,
    valid: Outlet<u64>,
    invalid: Outlet<MalformedRecord<String>>,
}

impl Streamlet for ParseNumbers {
    fn shape(&self) -> Result<Shape, ShapeMismatchError> {
        Shape::builder()
            .inlet(&self.input)
            .outlet(&self.valid)
            .outlet(&self.invalid)
            .build()
    }

    fn create_logic(&self) -> StreamletLogic {
        let input = self.input.clone();
        let valid = self.valid.clone();
        let invalid = self.invalid.clone();
        StreamletLogic::graph(move |ctx| {
            let parsed = ctx.source_with_context(&input)?.map(|s: String| {
                s.parse::<u64>()
                    .map_err(|e| MalformedRecord::new(s.clone(), e.to_string()))
            });
            Ok(parsed.to(ctx.split_sink(&valid, &invalid)?))
        })
    }
}

/// Sums pairs of numbers and only commits.
#[derive(Debug)]
struct PairSums {
    input: Inlet<u64>,
}

impl Streamlet for PairSums {
    fn shape(&self) -> Result<Shape, ShapeMismatchError> {
        Shape::builder().inlet(&self.input).build()
    }

    fn create_logic(&self) -> StreamletLogic {
        let input = self.input.clone();
        StreamletLogic::graph(move |ctx| {
            let sums = ctx
                .source_with_context(&input)?
                .fold_grouped(2, || 0, |acc, v: u64| acc + v)
                .collapse();
            Ok(sums.to(ctx.commit_sink()))
        })
    }
}

/// Never finishes.
#[derive(Debug)]
struct Endless {
    output: Outlet<u64>,
}

impl Streamlet for Endless {
    fn shape(&self) -> Result<Shape, ShapeMismatchError> {
        Shape::builder().outlet(&self.output).build()
    }

    fn create_logic(&self) -> StreamletLogic {
        StreamletLogic::produce(&self.output, futures::stream::pending::<u64>)
    }
}

fn batch_of_three() -> StreamletSettings {
    StreamletSettings::default().with_commit(
        CommitterSettings::default()
            .with_max_batch_size(3)
            .with_max_batch_interval(Duration::from_secs(60))
            .with_retry(RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(5)),
    )
}

#[tokio::test]
async fn test_odd_filter_commits_three_seven_nine() {
    let streamlet = OddFilter::new();
    let input = InletTap::new(&streamlet.input).with_start_position(1);
    input.add_data(1..=10);
    let output = OutletTap::new(&streamlet.output);
    let harness = TestHarness::new().with_settings(batch_of_three());

    let result = harness.run(&streamlet, &[&input], &[&output], TIMEOUT).await.unwrap();

    assert_eq!(output.as_collection(), vec![1, 3, 5, 7, 9]);
    assert_eq!(result.committed_positions(&input.partition(0)), vec![3, 7, 9]);
    assert_eq!(harness.committed(&input, 0), Some(9));
}

#[tokio::test]
async fn test_second_run_resumes_after_commit() {
    let streamlet = OddFilter::new();
    let input = InletTap::new(&streamlet.input).with_start_position(1);
    input.add_data(1..=10);
    let output = OutletTap::new(&streamlet.output).with_output_mode(OutputMode::Update);
    let harness = TestHarness::new().with_settings(batch_of_three());

    harness.run(&streamlet, &[&input], &[&output], TIMEOUT).await.unwrap();
    input.add_data([11]);
    let second = harness.run(&streamlet, &[&input], &[&output], TIMEOUT).await.unwrap();

    assert_eq!(output.as_collection(), vec![1, 3, 5, 7, 9, 11]);
    assert_eq!(second.committed_positions(&input.partition(0)), vec![11]);
}

#[tokio::test]
async fn test_select_names_append() {
    let streamlet = SelectName {
        input: Inlet::new("people"),
        output: Outlet::new("names"),
    };
    let input = InletTap::new(&streamlet.input);
    input.add_data((1..=10).map(|i| Person {
        name: format!("name{i}"),
        city: "Lisbon".to_string(),
    }));
    assert_eq!(input.len(), 10);
    let output = OutletTap::new(&streamlet.output).with_output_mode(OutputMode::Append);

    let result = TestHarness::new()
        .run(&streamlet, &[&input], &[&output], TIMEOUT)
        .await
        .unwrap();

    let expected: Vec<String> = (1..=10).map(|i| format!("name{i}")).collect();
    assert_eq!(output.as_collection(), expected);
    assert!(result.commits.is_empty());
}

#[tokio::test]
async fn test_append_keeps_equal_names() {
    let streamlet = SelectName {
        input: Inlet::new("people"),
        output: Outlet::new("names"),
    };
    let input = InletTap::new(&streamlet.input);
    input.add_data(["ann", "bob", "ann"].map(|name| Person {
        name: name.to_string(),
        city: "Porto".to_string(),
    }));
    let output = OutletTap::new(&streamlet.output).with_output_mode(OutputMode::Append);

    TestHarness::new()
        .run(&streamlet, &[&input], &[&output], TIMEOUT)
        .await
        .unwrap();

    assert_eq!(output.as_collection(), vec!["ann", "bob", "ann"]);
}

#[tokio::test]
async fn test_groups_commit_every_partition() {
    let streamlet = PairSums {
        input: Inlet::new("in"),
    };
    let input = InletTap::new(&streamlet.input).with_partitions(2);
    input.add_data_to(0, [1]);
    input.add_data_to(1, [2, 3]);
    let harness = TestHarness::new();

    let result = harness.run(&streamlet, &[&input], &[], TIMEOUT).await.unwrap();

    assert_eq!(harness.committed(&input, 0), Some(0));
    assert_eq!(harness.committed(&input, 1), Some(1));
    assert_eq!(result.committed_positions(&input.partition(0)), vec![0]);
}

async fn word_counts(mode: OutputMode) -> Vec<AggregateRow<u64>> {
    let streamlet = WordCount::new();
    let input = InletTap::new(&streamlet.input);
    input.add_data(["a", "b", "a", "c", "a", "b"].map(String::from));
    let output = OutletTap::new(&streamlet.output).with_output_mode(mode);
    let harness = TestHarness::new().with_settings(batch_of_three().with_output_mode(mode));

    harness.run(&streamlet, &[&input], &[&output], TIMEOUT).await.unwrap();
    assert_eq!(harness.committed(&input, 0), Some(5));
    output.as_collection()
}

#[tokio::test]
async fn test_update_mode_keeps_rows_across_batches() {
    assert_eq!(
        word_counts(OutputMode::Update).await,
        vec![
            AggregateRow::new("a", 2),
            AggregateRow::new("b", 1),
            AggregateRow::new("c", 1),
            AggregateRow::new("a", 3),
            AggregateRow::new("b", 2),
        ]
    );
}

#[tokio::test]
async fn test_append_mode_captures_new_rows_only() {
    assert_eq!(
        word_counts(OutputMode::Append).await,
        vec![AggregateRow::new("a", 2), AggregateRow::new("b", 1), AggregateRow::new("c", 1)]
    );
}

#[tokio::test]
async fn test_state_is_scoped_to_one_run() {
    let streamlet = WordCount::new();
    let input = InletTap::new(&streamlet.input);
    input.add_data(["a", "b", "a"].map(String::from));
    let output = OutletTap::new(&streamlet.output).with_output_mode(OutputMode::Update);
    let harness = TestHarness::new().with_settings(batch_of_three().with_output_mode(OutputMode::Update));

    let first = harness.run(&streamlet, &[&input], &[&output], TIMEOUT).await.unwrap();
    assert_eq!(first.state_keys, 2);

    input.add_data(["a".to_string()]);
    let second = harness.run(&streamlet, &[&input], &[&output], TIMEOUT).await.unwrap();

    assert_eq!(second.state_keys, 1);
    assert_eq!(
        output.as_collection(),
        vec![
            AggregateRow::new("a", 2),
            AggregateRow::new("b", 1),
            AggregateRow::new("a", 1)
        ]
    );
}

#[tokio::test]
async fn test_malformed_records_routed_to_invalid_outlet() {
    let streamlet = ParseNumbers {
        input: Inlet::new("in"),
        valid: Outlet::new("valid"),
        invalid: Outlet::new("invalid"),
    };
    let input = InletTap::new(&streamlet.input);
    input.add_data(["1", "two", "3"].map(String::from));
    let valid = OutletTap::new(&streamlet.valid);
    let invalid = OutletTap::new(&streamlet.invalid);

    TestHarness::new()
        .run(&streamlet, &[&input], &[&valid, &invalid], TIMEOUT)
        .await
        .unwrap();

    assert_eq!(valid.as_collection(), vec![1, 3]);
    let rejected = invalid.as_collection();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].record, "two");
}

#[tokio::test]
async fn test_commit_failures_are_retried() {
    let streamlet = OddFilter::new();
    let input = InletTap::new(&streamlet.input).with_start_position(1);
    input.add_data(1..=10);
    let harness = TestHarness::new()
        .with_settings(batch_of_three())
        .with_commit_failures(2);

    let result = harness.run(&streamlet, &[&input], &[], TIMEOUT).await.unwrap();

    assert_eq!(result.commits.len(), 5);
    assert_eq!(result.commits.iter().filter(|c| !c.succeeded).count(), 2);
    assert_eq!(result.committed_positions(&input.partition(0)), vec![3, 7, 9]);
}

#[tokio::test]
async fn test_timeout_when_logic_never_finishes() {
    let streamlet = Endless {
        output: Outlet::new("out"),
    };
    let err = TestHarness::new()
        .with_name("endless")
        .run(&streamlet, &[], &[], Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, StreamletError::Timeout { ref streamlet, .. } if streamlet == "endless"));
}

#[tokio::test]
async fn test_taps_checked_against_shape() {
    let streamlet = OddFilter::new();
    let harness = TestHarness::new();

    let wrong_type = InletTap::new(&Inlet::<String>::new("in"));
    let err = harness.run(&streamlet, &[&wrong_type], &[], TIMEOUT).await.unwrap_err();
    assert!(matches!(err, StreamletError::ShapeMismatch(ref e) if e.error_info.code == "SHAPE-003-TYPE"));

    let err = harness.run(&streamlet, &[], &[], TIMEOUT).await.unwrap_err();
    assert!(matches!(err, StreamletError::ShapeMismatch(ref e) if e.error_info.code == "SHAPE-005-UNCONNECTED"));

    let input = InletTap::new(&streamlet.input);
    let stray = OutletTap::new(&Outlet::<u64>::new("elsewhere"));
    let err = harness.run(&streamlet, &[&input], &[&stray], TIMEOUT).await.unwrap_err();
    assert!(matches!(err, StreamletError::ShapeMismatch(ref e) if e.error_info.code == "SHAPE-004-UNKNOWN_PORT"));
}
