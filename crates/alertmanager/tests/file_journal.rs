use alertmanager::notify::Sender;
use alertmanager::{App, Config, State};
use chrono::{DateTime, Duration, Utc};
use eventlog::{Cursor, FileLog};
use pretty_assertions::assert_eq;

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn snapshot_of<L: eventlog::EventLog>(app: &App<L, Sender>) -> (Cursor, State) {
    app.store().read(|state, cursor| (cursor, state.clone()))
}

#[tokio::test]
async fn test_cold_start_from_snapshot_and_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alertmanager.log");
    let t0 = ts("2019-09-07T12:00:00Z");

    let app = App::load(FileLog::new(&path), Sender::Disabled, Config::default())
        .await
        .unwrap();

    let disk = app.raise("disk full", "/var is at 100%", t0).await.unwrap();
    app.raise("replica lag", "", t0).await.unwrap();
    app.checkin_spec("backups", "+1d@03:00", t0).await.unwrap();
    app.create_monitor("https://example.com/", "Welcome", t0)
        .await
        .unwrap();

    let snapshot_cursor = app.save_snapshot().await.unwrap();
    assert_eq!(snapshot_cursor.offset(), 5);

    // Events which follow the snapshot.
    app.acknowledge(&disk.id, t0 + Duration::minutes(5))
        .await
        .unwrap();
    app.checkin_spec("backups", "+1d@03:00", t0 + Duration::hours(1))
        .await
        .unwrap();
    app.delete_switch("backups", t0 + Duration::hours(2))
        .await
        .unwrap();

    let expect = snapshot_of(&app);
    assert_eq!(expect.0.offset(), 8);

    // A cold start installs the snapshot, and folds only the tail.
    let restarted = App::load(FileLog::new(&path), Sender::Disabled, Config::default())
        .await
        .unwrap();
    assert_eq!(snapshot_of(&restarted), expect);

    // Which matches a replay of the complete log.
    std::fs::remove_file(dir.path().join("alertmanager.log.snapshot")).unwrap();
    let replayed = App::load(FileLog::new(&path), Sender::Disabled, Config::default())
        .await
        .unwrap();
    assert_eq!(snapshot_of(&replayed), expect);

    let subjects: Vec<String> = replayed
        .active_alerts()
        .into_iter()
        .map(|alert| alert.subject)
        .collect();
    assert_eq!(subjects, vec!["replica lag".to_string()]);
    assert!(replayed.dead_mans_switches().is_empty());
    assert_eq!(replayed.http_monitors().len(), 1);
}

#[tokio::test]
async fn test_writers_of_one_file_observe_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alertmanager.log");
    let t0 = ts("2019-09-07T12:00:00Z");

    let first = App::new(FileLog::new(&path), Sender::Disabled, Config::default());
    let second = App::new(FileLog::new(&path), Sender::Disabled, Config::default());

    first.raise("disk full", "", t0).await.unwrap();

    // The second writer syncs before deciding, and sees the first's alert.
    let err = second.raise("disk full", "", t0).await.unwrap_err();
    assert_eq!(err.to_string(), "already have an active alert: disk full");
}
