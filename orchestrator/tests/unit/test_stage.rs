//! Stage extraction over journal-formatted logs

use deployd::deploy::journal::{self, Stage};
use deployd::deploy::stage::{StageExtractor, DEFAULT_STAGE};

#[test]
fn test_stage_follows_journal_markers() {
    let extractor = StageExtractor::default();
    let mut log = journal::line("deployment started by alice");
    assert_eq!(extractor.extract(&log), DEFAULT_STAGE);

    log.push_str(&journal::stage_line(Stage::Preparing, "resolving target"));
    assert_eq!(extractor.extract(&log), "preparing");

    log.push_str(&journal::stage_line(Stage::Building, "running build script"));
    log.push_str(&journal::line("compiling 42 files"));
    assert_eq!(extractor.extract(&log), "building");

    log.push_str(&journal::stage_line(Stage::Deploying, "running deploy script"));
    assert_eq!(extractor.extract(&log), "deploying");

    log.push_str(&journal::stage_line(Stage::Verifying, "GET http://localhost/health"));
    assert_eq!(extractor.extract(&log), "verifying");
}

#[test]
fn test_stage_from_script_output_after_marker() {
    let extractor = StageExtractor::default();
    let mut log = journal::stage_line(Stage::Preparing, "resolving target");
    log.push_str(&journal::line("npm ci"));
    assert_eq!(extractor.extract(&log), "building");

    log.push_str(&journal::line("systemctl restart web"));
    assert_eq!(extractor.extract(&log), "deploying");
}

#[test]
fn test_later_marker_outranks_earlier_phase_output() {
    let extractor = StageExtractor::default();
    let mut log = journal::stage_line(Stage::Deploying, "running deploy script");
    log.push_str(&journal::line("Make sure port 8080 is open"));
    log.push_str(&journal::line("yarn build cache is warm"));
    assert_eq!(extractor.extract(&log), "deploying");

    log.push_str(&journal::stage_line(Stage::Verifying, "GET http://localhost/health"));
    log.push_str(&journal::line("git pull finished on mirror"));
    assert_eq!(extractor.extract(&log), "verifying");
}

#[test]
fn test_journal_line_timestamps_every_line() {
    let text = journal::line("first\nsecond\n");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert!(line.starts_with('['));
        assert!(line.contains("Z] "));
    }
    assert!(lines[0].ends_with("first"));
    assert!(lines[1].ends_with("second"));
    assert!(text.ends_with('\n'));
}

#[test]
fn test_journal_tail_respects_char_boundaries() {
    assert_eq!(journal::tail("hello", 10), "hello");
    assert_eq!(journal::tail("hello world", 5), "world");
    // 'é' is two bytes; cutting inside it moves forward
    assert_eq!(journal::tail("aéb", 2), "b");
}
