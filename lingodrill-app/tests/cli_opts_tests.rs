use clap::Parser;
use lingodrill_app::cli::opts::{Cli, Command, DrillCmd, ReviewCmd, StoreKind};

#[test]
fn scope_flags_apply_after_subcommand() {
    let cli = Cli::try_parse_from([
        "lingodrill", "review", "grade", "0b8e3c9e-4d7a-4a38-9a55-1f8a0f0c5e11", "easy", "--user", "ana",
        "--lang", "es",
    ])
    .unwrap();
    assert_eq!(cli.user, "ana");
    assert_eq!(cli.language, "es");
    match cli.cmd {
        Command::Review(ReviewCmd::Grade { quality, .. }) => assert_eq!(quality, "easy"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn store_kind_parses_pg() {
    let cli = Cli::try_parse_from(["lingodrill", "--store", "pg", "stats"]).unwrap();
    assert!(matches!(cli.store, StoreKind::Pg));
}

#[test]
fn snooze_hours_and_until_conflict() {
    let err = Cli::try_parse_from([
        "lingodrill", "drill", "snooze", "x", "--hours", "2", "--until", "2030-01-01T00:00:00Z",
    ]);
    assert!(err.is_err());

    let cli = Cli::try_parse_from(["lingodrill", "drill", "snooze", "x"]).unwrap();
    match cli.cmd {
        Command::Drill(DrillCmd::Snooze { hours, until, .. }) => {
            assert_eq!(hours, 24);
            assert!(until.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
