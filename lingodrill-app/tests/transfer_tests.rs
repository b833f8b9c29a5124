use lingodrill_app::cli::transfer::{export_csv, export_json, import_csv, import_json, CSV_HEADER};
use lingodrill_core::memory::MemoryRepo;
use lingodrill_core::{Card, CardStatus, CoreError, Repository, Scope};

fn scope() -> Scope {
    Scope::new("ana", "es")
}

async fn seeded() -> MemoryRepo {
    let repo = MemoryRepo::new();
    let basics = repo.create_group(&scope(), "Basics", Some("first words")).await.unwrap();
    let verbs = repo.create_group(&scope(), "Verbs", None).await.unwrap();

    let mut hola = Card::new(scope(), "hola").with_meaning("hello");
    hola.examples = vec!["¡Hola, Ana!".into(), "Hola a todos".into()];
    let hola = repo.add_card(&hola).await.unwrap();
    let mut ser = Card::new(scope(), "ser").with_meaning("to be");
    ser.mnemonics = vec!["SER = essence".into()];
    let ser = repo.add_card(&ser).await.unwrap();
    repo.add_card(&Card::new(scope(), "loose")).await.unwrap();

    repo.assign_card(&scope(), hola.id, basics.id).await.unwrap();
    repo.assign_card(&scope(), ser.id, basics.id).await.unwrap();
    repo.assign_card(&scope(), ser.id, verbs.id).await.unwrap();
    repo
}

#[tokio::test]
async fn json_bundle_moves_cards_into_another_scope() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    let src = seeded().await;
    assert_eq!(export_json(&src, &scope(), &path).await.unwrap(), 3);

    // The target already has a "verbs" group with a different id.
    let dst = MemoryRepo::new();
    let other = Scope::new("ben", "es");
    let existing = dst.create_group(&other, "verbs", None).await.unwrap();

    assert_eq!(import_json(&dst, &other, &path).await.unwrap(), 3);
    let groups = dst.list_groups(&other).await.unwrap();
    assert_eq!(groups.len(), 2);
    let verbs: Vec<String> = dst
        .list_group_cards(&other, existing.id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.content)
        .collect();
    assert_eq!(verbs, vec!["ser".to_string()]);

    let basics = groups.iter().find(|g| g.name == "Basics").unwrap();
    assert_eq!(basics.description.as_deref(), Some("first words"));
    assert_eq!(dst.list_group_cards(&other, basics.id).await.unwrap().len(), 2);

    let hola = dst
        .list_cards(&other, None)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.content == "hola")
        .unwrap();
    assert_eq!(hola.scope, other);
    assert_eq!(hola.examples.len(), 2);

    // A second import adds nothing and does not fail on existing memberships.
    assert_eq!(import_json(&dst, &other, &path).await.unwrap(), 0);
    assert_eq!(dst.list_cards(&other, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn newer_bundle_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.json");
    std::fs::write(&path, r#"{"version": 2, "groups": [], "cards": [], "memberships": []}"#).unwrap();
    let repo = MemoryRepo::new();
    assert!(import_json(&repo, &scope(), &path).await.is_err());
}

#[tokio::test]
async fn csv_round_trip_keeps_lists_and_groups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cards.csv");
    let src = seeded().await;
    assert_eq!(export_csv(&src, &scope(), &path, None).await.unwrap(), 3);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with(&CSV_HEADER.join(",")));
    assert!(text.contains("¡Hola, Ana!;Hola a todos"));

    let dst = MemoryRepo::new();
    assert_eq!(import_csv(&dst, &scope(), &path, None).await.unwrap(), 3);
    let names: Vec<String> = dst
        .list_groups(&scope())
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.name)
        .collect();
    // "ser" is exported under its first group by name only.
    assert_eq!(names, vec!["Basics".to_string()]);

    let cards = dst.list_cards(&scope(), None).await.unwrap();
    let hola = cards.iter().find(|c| c.content == "hola").unwrap();
    assert_eq!(hola.meaning.as_deref(), Some("hello"));
    assert_eq!(hola.examples, vec!["¡Hola, Ana!".to_string(), "Hola a todos".to_string()]);
    let ser = cards.iter().find(|c| c.content == "ser").unwrap();
    assert_eq!(ser.mnemonics, vec!["SER = essence".to_string()]);
    let loose = cards.iter().find(|c| c.content == "loose").unwrap();
    assert!(dst.list_card_groups(&scope(), loose.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn csv_import_into_named_group() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.csv");
    std::fs::write(
        &path,
        "content,meaning,card_type,status,examples,mnemonics,group\n\
         gato,cat,word,draft,,,animales\n\
         ,,,,,,\n\
         perro,dog,,,un perro; ;dos perros,,\n",
    )
    .unwrap();

    let repo = MemoryRepo::new();
    let target = repo.create_group(&scope(), "Nouns", None).await.unwrap();
    assert_eq!(import_csv(&repo, &scope(), &path, Some(&target)).await.unwrap(), 2);

    // The explicit group wins over the row's group column.
    assert_eq!(repo.list_groups(&scope()).await.unwrap().len(), 1);
    let members = repo.list_group_cards(&scope(), target.id).await.unwrap();
    assert_eq!(members.len(), 2);
    let gato = members.iter().find(|c| c.content == "gato").unwrap();
    assert_eq!(gato.status, CardStatus::Draft);
    let perro = members.iter().find(|c| c.content == "perro").unwrap();
    assert_eq!(perro.examples, vec!["un perro".to_string(), "dos perros".to_string()]);
    assert_eq!(perro.status, CardStatus::Active);
}

#[tokio::test]
async fn csv_rows_reuse_groups_ignoring_case() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.csv");
    std::fs::write(
        &path,
        "content,meaning,card_type,status,examples,mnemonics,group\n\
         año,year,,,,,Ñandú\n\
         mes,month,,,,,ñANDÚ\n",
    )
    .unwrap();
    let repo = MemoryRepo::new();
    assert_eq!(import_csv(&repo, &scope(), &path, None).await.unwrap(), 2);
    let groups = repo.list_groups(&scope()).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "Ñandú");
    assert_eq!(repo.list_group_cards(&scope(), groups[0].id).await.unwrap().len(), 2);

    let err = repo.create_group(&scope(), "ÑANDÚ", None).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}
