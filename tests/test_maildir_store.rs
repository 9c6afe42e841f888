#[cfg(feature = "maildir-backend")]
use mailbox_sync::{
    Flag, FlagBits, Flags, ItemKind, LocalStore, MailboxLock, MailboxSync, MaildirBackend,
    MaildirConfig, MemoryRemote, ParsedEmail, SyncConfig,
};

#[cfg(feature = "maildir-backend")]
fn email(n: usize) -> Vec<u8> {
    format!("Message-ID: <{n}@localhost>\r\nSubject: message {n}\r\n\r\nbody {n}\r\n").into_bytes()
}

#[cfg(feature = "maildir-backend")]
#[test]
fn test_maildir_store() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let config = MaildirConfig::new(dir.path());
    let mdir = MaildirBackend::new(&config).unwrap();

    // folders

    let inbox = mdir.create_folder("/Imported/INBOX").unwrap();
    let notes = mdir.create_folder("/Notes").unwrap();
    assert!(mdir.create_folder("/Imported/INBOX").is_err());
    assert!(dir.path().join(".Imported.INBOX").join("cur").is_dir());

    let folders = mdir.list_folders().unwrap();
    assert_eq!(folders, vec![inbox.clone(), notes.clone()]);
    assert_eq!(mdir.get_folder(inbox.id).unwrap(), inbox);
    assert_eq!(mdir.get_folder_by_path("/Imported/INBOX").unwrap(), inbox);
    assert!(mdir
        .get_folder_by_path("/Imported/Sent")
        .unwrap_err()
        .is_not_found());

    // messages

    let email1 = ParsedEmail::parse(email(1)).unwrap();
    let id = mdir
        .create_message(inbox.id, &email1, FlagBits::SEEN | FlagBits::FLAGGED)
        .unwrap();
    assert_eq!(mdir.list_item_ids(ItemKind::Message, inbox.id).unwrap(), vec![id]);
    assert!(mdir
        .list_item_ids(ItemKind::Chat, inbox.id)
        .unwrap()
        .is_empty());

    let msg = mdir.get_message(id).unwrap();
    assert_eq!(msg.folder, inbox.id);
    assert_eq!(msg.flags, FlagBits::SEEN | FlagBits::FLAGGED);
    assert_eq!(msg.raw, email(1));

    mdir.set_flags(id, FlagBits::ANSWERED).unwrap();
    assert_eq!(mdir.get_message(id).unwrap().flags, FlagBits::ANSWERED);

    // ids survive a new instance

    drop(mdir);
    let mdir = MaildirBackend::new(&config).unwrap();
    assert_eq!(mdir.get_folder_by_path("/Imported/INBOX").unwrap().id, inbox.id);
    assert_eq!(mdir.list_item_ids(ItemKind::Message, inbox.id).unwrap(), vec![id]);

    // deletions

    let email2 = ParsedEmail::parse(email(2)).unwrap();
    let id2 = mdir
        .create_message(inbox.id, &email2, FlagBits::EMPTY)
        .unwrap();
    assert_ne!(id2, id);
    mdir.delete_item(id).unwrap();
    assert!(mdir.get_message(id).unwrap_err().is_not_found());
    assert_eq!(mdir.list_item_ids(ItemKind::Message, inbox.id).unwrap(), vec![id2]);

    mdir.empty_folder(inbox.id).unwrap();
    assert!(mdir
        .list_item_ids(ItemKind::Message, inbox.id)
        .unwrap()
        .is_empty());

    mdir.delete_folder(notes.id).unwrap();
    assert!(mdir.get_folder(notes.id).unwrap_err().is_not_found());
    assert_eq!(mdir.list_folders().unwrap(), vec![inbox]);
}

#[cfg(feature = "maildir-backend")]
#[test]
fn test_sync_remote_into_maildir() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mdir_dir = tempfile::tempdir().unwrap();
    let sync_dir = tempfile::tempdir().unwrap();

    let config = SyncConfig {
        sync_dir: Some(sync_dir.path().to_owned()),
        ..SyncConfig::new("test-sync-remote-into-maildir")
    };
    let mdir = MaildirBackend::new(&MaildirConfig::new(mdir_dir.path())).unwrap();
    let remote = MemoryRemote::new();
    let lock = MailboxLock::from_config(&config);

    remote.add_folder("INBOX");
    remote.add_folder("Sent");
    remote
        .add_message("INBOX", &email(1), Flags::from_iter([Flag::Seen]))
        .unwrap();
    remote
        .add_message("Sent", &email(2), Flags::default())
        .unwrap();

    let report = MailboxSync::new(&config, &remote, &mdir, &lock)
        .sync_all()
        .unwrap();
    assert!(report.is_ok());
    assert_eq!(report.statistics().added_locally, 2);
    assert!(sync_dir.path().join("tracking.sqlite").is_file());

    let inbox = mdir.get_folder_by_path("/Imported/INBOX").unwrap();
    let ids = mdir.list_item_ids(ItemKind::Message, inbox.id).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(mdir.get_message(ids[0]).unwrap().flags, FlagBits::SEEN);

    // a local flag change reaches the remote side through the
    // persisted tracking state
    mdir.set_flags(ids[0], FlagBits::SEEN | FlagBits::ANSWERED)
        .unwrap();
    let report = MailboxSync::new(&config, &remote, &mdir, &lock)
        .full_sync(true)
        .sync_all()
        .unwrap();
    assert!(report.is_ok());
    assert_eq!(report.statistics().updated, 1);
    assert_eq!(report.statistics().added_locally, 0);
    assert_eq!(
        remote.message_flags("INBOX", 1),
        Some(Flags::from_iter([Flag::Seen, Flag::Answered]))
    );
}

#[cfg(feature = "maildir-backend")]
#[test]
fn test_renamed_maildir_folder_renames_remote_folder() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mdir_dir = tempfile::tempdir().unwrap();
    let sync_dir = tempfile::tempdir().unwrap();

    let config = SyncConfig {
        sync_dir: Some(sync_dir.path().to_owned()),
        ..SyncConfig::new("test-renamed-maildir-folder")
    };
    let mdir = MaildirBackend::new(&MaildirConfig::new(mdir_dir.path())).unwrap();
    let remote = MemoryRemote::new();
    let lock = MailboxLock::from_config(&config);

    remote.add_folder("Work");
    remote
        .add_message("Work", &email(1), Flags::default())
        .unwrap();

    let report = MailboxSync::new(&config, &remote, &mdir, &lock)
        .sync_all()
        .unwrap();
    assert!(report.is_ok());
    let folder_id = mdir.get_folder_by_path("/Imported/Work").unwrap().id;

    std::fs::rename(
        mdir_dir.path().join(".Imported.Work"),
        mdir_dir.path().join(".Imported.Jobs"),
    )
    .unwrap();
    remote
        .add_message("Work", &email(2), Flags::default())
        .unwrap();
    remote.clear_commands();

    let report = MailboxSync::new(&config, &remote, &mdir, &lock)
        .sync_all()
        .unwrap();
    assert!(report.is_ok());
    assert_eq!(remote.count_commands("RENAME Work Jobs"), 1);
    assert_eq!(remote.count_commands("DELETE"), 0);
    assert_eq!(remote.count_commands("CREATE"), 0);
    assert_eq!(remote.message_uids("Jobs"), vec![1, 2]);

    let jobs = mdir.get_folder_by_path("/Imported/Jobs").unwrap();
    assert_eq!(jobs.id, folder_id);
    assert_eq!(mdir.list_item_ids(ItemKind::Message, jobs.id).unwrap().len(), 2);
    assert_eq!(report.statistics().added_locally, 1);
}

#[cfg(feature = "maildir-backend")]
#[test]
fn test_copied_maildir_folder_gets_its_own_id() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let mdir = MaildirBackend::new(&MaildirConfig::new(dir.path())).unwrap();
    let work = mdir.create_folder("/Work").unwrap();

    let copy = dir.path().join(".Copy");
    for subdir in ["cur", "new", "tmp"] {
        std::fs::create_dir_all(copy.join(subdir)).unwrap();
    }
    std::fs::copy(
        dir.path().join(".Work").join(".mailbox-sync-folder-id"),
        copy.join(".mailbox-sync-folder-id"),
    )
    .unwrap();

    let folders = mdir.list_folders().unwrap();
    assert_eq!(folders.len(), 2);
    assert_eq!(folders[0], work);
    assert_eq!(folders[1].path, "/Copy");
    assert_ne!(folders[1].id, work.id);
    assert_eq!(mdir.get_folder(work.id).unwrap().path, "/Work");
}
