mod common;

use common::{
    block_entry, create_file, delete_file, discard_logger, eventually, now_ms, set_ttl, set_ttl_delete, Domains,
    FileInfo,
};
use metajournal::{
    CatalogError, Domain, JournalError, JournalOptions, OperationId, SequenceNumber, UfsJournalConfig,
    UfsJournalSystem,
};
use std::error::Error;
use std::path::Path;
use tokio::time::Duration;

async fn open(directory: &Path, domains: &Domains) -> Result<UfsJournalSystem, Box<dyn Error>> {
    open_with_options(directory, domains, JournalOptions::default()).await
}

async fn open_with_options(
    directory: &Path,
    domains: &Domains,
    options: JournalOptions,
) -> Result<UfsJournalSystem, Box<dyn Error>> {
    let config = UfsJournalConfig {
        base_directory: directory.to_path_buf(),
        info_logger: discard_logger(),
        options,
    };
    Ok(metajournal::try_create_ufs_journal(config, domains.journaled()).await?)
}

#[tokio::test]
async fn committed_batches_survive_restart() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;

    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;
    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/a", 1, 0));
    context.append(create_file("/b", 2, 0));
    let receipt = context.close().await?;
    assert_eq!(receipt.last_sequence_number, Some(SequenceNumber::new(2)));
    assert!(!receipt.duplicate);

    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(delete_file("/a", 1));
    context.close().await?;
    journal.shutdown().await;

    let restarted = Domains::new();
    let journal = open(directory.path(), &restarted).await?;
    assert_eq!(restarted.namespace.files().len(), 1);
    assert_eq!(restarted.namespace.file("/b"), Some(FileInfo { id: 2, ttl: 0 }));
    assert_eq!(
        journal.last_sequence_number(Domain::FileSystem).await?,
        Some(SequenceNumber::new(3))
    );
    assert_eq!(journal.last_sequence_number(Domain::Block).await?, None);

    // Numbering continues where it left off.
    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(set_ttl("/b", 60));
    let receipt = context.close().await?;
    assert_eq!(receipt.last_sequence_number, Some(SequenceNumber::new(4)));
    assert_eq!(restarted.namespace.file("/b"), Some(FileInfo { id: 2, ttl: 60 }));

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn restart_resumes_from_checkpoint() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;

    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;
    for i in 0..5 {
        let mut context = journal.create_journal_context(Domain::FileSystem)?;
        context.append(create_file(&format!("/f{}", i), i, 0));
        context.close().await?;
    }
    let covered = journal.trigger_checkpoint(Domain::FileSystem).await?;
    assert_eq!(covered, Some(SequenceNumber::new(5)));

    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/after", 99, 0));
    context.close().await?;
    journal.shutdown().await;

    let restarted = Domains::new();
    let journal = open(directory.path(), &restarted).await?;
    let files = restarted.namespace.files();
    assert_eq!(files.len(), 6);
    assert!(files.contains_key("/f0"));
    assert!(files.contains_key("/after"));
    assert_eq!(
        journal.last_sequence_number(Domain::FileSystem).await?,
        Some(SequenceNumber::new(6))
    );

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn checkpoint_of_empty_domain_covers_nothing() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;

    assert_eq!(journal.trigger_checkpoint(Domain::Job).await?, None);

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn retried_operation_applies_once() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;
    let operation_id = OperationId::random();

    let mut context = journal.create_journal_context_with_operation_id(Domain::Block, operation_id)?;
    context.append(block_entry());
    let first = context.close().await?;
    assert!(!first.duplicate);

    let mut context = journal.create_journal_context_with_operation_id(Domain::Block, operation_id)?;
    context.append(block_entry());
    let second = context.close().await?;
    assert!(second.duplicate);
    assert_eq!(domains.block.applied().len(), 1);

    journal.shutdown().await;

    // The dedup window is rebuilt from the log as well.
    let restarted = Domains::new();
    let journal = open(directory.path(), &restarted).await?;
    let mut context = journal.create_journal_context_with_operation_id(Domain::Block, operation_id)?;
    context.append(block_entry());
    assert!(context.close().await?.duplicate);
    assert_eq!(restarted.block.applied().len(), 1);

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn entry_of_another_domain_is_refused() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;

    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(block_entry());
    match context.close().await {
        Err(JournalError::Catalog(CatalogError::ForeignEntry { .. })) => {}
        other => panic!("Unexpected result {:?}", other),
    }
    assert!(domains.block.applied().is_empty());

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn empty_context_writes_nothing() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;

    let receipt = journal.create_journal_context(Domain::FileSystem)?.close().await?;
    assert_eq!(receipt.last_sequence_number, None);
    assert_eq!(journal.last_sequence_number(Domain::FileSystem).await?, None);

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rejected_entry_fails_the_domain() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;

    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/dup", 1, 0));
    context.close().await?;

    // The namespace refuses a second file at the same path.
    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/dup", 2, 0));
    assert!(context.close().await.is_err());

    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/other", 3, 0));
    match context.close().await {
        Err(JournalError::Failed(_)) => {}
        other => panic!("Unexpected result {:?}", other),
    }

    // Other domains carry on.
    let mut context = journal.create_journal_context(Domain::Block)?;
    context.append(block_entry());
    context.close().await?;

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_domain_is_rejected_at_open() {
    let directory = tempfile::tempdir().unwrap();
    let domains = Domains::new();
    let mut journaled = domains.journaled();
    journaled.pop();

    let config = UfsJournalConfig {
        base_directory: directory.path().to_path_buf(),
        info_logger: discard_logger(),
        options: JournalOptions::default(),
    };
    assert!(metajournal::try_create_ufs_journal(config, journaled).await.is_err());
}

#[tokio::test]
async fn small_segments_roll_and_replay() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let options = JournalOptions {
        segment_size_bytes: Some(256),
        ..JournalOptions::default()
    };

    let domains = Domains::new();
    let journal = open_with_options(directory.path(), &domains, options.clone()).await?;
    for i in 0..40 {
        let mut context = journal.create_journal_context(Domain::FileSystem)?;
        context.append(create_file(&format!("/segment/{}", i), i, 0));
        context.close().await?;
    }
    journal.shutdown().await;

    let restarted = Domains::new();
    let journal = open_with_options(directory.path(), &restarted, options).await?;
    assert_eq!(restarted.namespace.files().len(), 40);

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn entry_threshold_rotates_the_log() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let options = JournalOptions {
        checkpoint_period_entries: Some(3),
        ..JournalOptions::default()
    };
    let domain_directory = directory.path().join(Domain::FileSystem.name());
    let first_segment = domain_directory.join("logs").join(format!("segment-{:020}.log", 1));

    let domains = Domains::new();
    let journal = open_with_options(directory.path(), &domains, options.clone()).await?;
    for i in 0..3 {
        let mut context = journal.create_journal_context(Domain::FileSystem)?;
        context.append(create_file(&format!("/rotated/{}", i), i, 0));
        context.close().await?;
    }

    // The background checkpointer picks it up.
    let rotated = eventually(Duration::from_secs(5), || {
        let first_segment = first_segment.clone();
        async move { !first_segment.exists() }
    })
    .await;
    assert!(rotated, "{:?} outlived the checkpoint covering it", first_segment);
    assert!(std::fs::read_dir(domain_directory.join("checkpoints"))?.next().is_some());
    journal.shutdown().await;

    let restarted = Domains::new();
    let journal = open_with_options(directory.path(), &restarted, options).await?;
    assert_eq!(restarted.namespace.files(), domains.namespace.files());
    assert_eq!(
        journal.last_sequence_number(Domain::FileSystem).await?,
        Some(SequenceNumber::new(3))
    );

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn ttl_action_survives_checkpoint_and_restart() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let created_at = now_ms();

    let domains = Domains::new();
    let journal = open(directory.path(), &domains).await?;
    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/ttl", 1, 0));
    context.append(create_file("/keep", 2, 0));
    context.append(set_ttl_delete("/ttl", 60_000, created_at));
    context.close().await?;
    journal.trigger_checkpoint(Domain::FileSystem).await?;
    journal.shutdown().await;

    let restarted = Domains::new();
    let journal = open(directory.path(), &restarted).await?;
    assert!(restarted.namespace.expired(created_at + 59_999).is_empty());
    let expired = restarted.namespace.expired(created_at + 60_000);
    assert_eq!(expired, vec![("/ttl".to_string(), 1)]);

    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    for (path, id) in expired.iter() {
        context.append(delete_file(path, *id));
    }
    context.close().await?;
    assert_eq!(restarted.namespace.files().keys().collect::<Vec<_>>(), vec!["/keep"]);

    journal.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_checkpoint_keeps_rotation_due() -> Result<(), Box<dyn Error>> {
    let directory = tempfile::tempdir()?;
    let options = JournalOptions {
        checkpoint_period_entries: Some(4),
        ..JournalOptions::default()
    };
    let domain_directory = directory.path().join(Domain::FileSystem.name());
    let checkpoints = domain_directory.join("checkpoints");
    let first_segment = domain_directory.join("logs").join(format!("segment-{:020}.log", 1));

    let domains = Domains::new();
    let journal = open_with_options(directory.path(), &domains, options).await?;

    // No checkpoint can be written while a plain file sits where the directory belongs.
    std::fs::remove_dir_all(&checkpoints)?;
    std::fs::write(&checkpoints, b"")?;
    for i in 0..3 {
        let mut context = journal.create_journal_context(Domain::FileSystem)?;
        context.append(create_file(&format!("/pending/{}", i), i, 0));
        context.close().await?;
    }
    assert!(journal.trigger_checkpoint(Domain::FileSystem).await.is_err());
    assert!(first_segment.exists());

    std::fs::remove_file(&checkpoints)?;
    std::fs::create_dir(&checkpoints)?;

    // The three entries from before the failure still count toward the threshold.
    let mut context = journal.create_journal_context(Domain::FileSystem)?;
    context.append(create_file("/pending/3", 3, 0));
    context.close().await?;
    let rotated = eventually(Duration::from_secs(5), || {
        let first_segment = first_segment.clone();
        async move { !first_segment.exists() }
    })
    .await;
    assert!(rotated, "{:?} outlived the checkpoint covering it", first_segment);
    assert!(std::fs::read_dir(&checkpoints)?.next().is_some());

    journal.shutdown().await;
    Ok(())
}
