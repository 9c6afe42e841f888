use mailbox_sync::{
    folder::sync::{Cache, ErrorKind, MailboxSync, SyncReport},
    Flag, FlagBits, Flags, ItemKind, LocalStore, MailboxLock, MemoryRemote, MemoryStore,
    RemoteFolderClient, SyncConfig,
};

fn email(n: usize) -> Vec<u8> {
    format!(
        "Message-ID: <{n}@localhost>\r\nFrom: alice@localhost\r\nSubject: message {n}\r\nDate: Thu, 1 Sep 2022 10:00:00 +0000\r\n\r\nbody {n}\r\n"
    )
    .into_bytes()
}

struct Mailbox {
    config: SyncConfig,
    remote: MemoryRemote,
    local: MemoryStore,
    lock: MailboxLock,
    cache: Cache,
}

impl Mailbox {
    fn new(remote: MemoryRemote) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        Self {
            config: SyncConfig::new("account"),
            remote,
            local: MemoryStore::new(),
            lock: MailboxLock::new("account"),
            cache: Cache::open_in_memory("account").unwrap(),
        }
    }

    fn sync(&self, full: bool) -> SyncReport {
        let report = MailboxSync::new(&self.config, &self.remote, &self.local, &self.lock)
            .full_sync(full)
            .sync_all_with_cache(&self.cache)
            .unwrap();
        assert!(self.lock.is_unlocked());
        report
    }

    fn local_folder_id(&self, path: &str) -> u32 {
        self.local.get_folder_by_path(path).unwrap().id
    }

    fn local_ids(&self, path: &str) -> Vec<u32> {
        let id = self.local_folder_id(path);
        self.local.list_item_ids(ItemKind::Message, id).unwrap()
    }
}

#[test]
fn test_first_sync_imports_remote_messages() {
    let mbox = Mailbox::new(MemoryRemote::new());
    let uid_validity = mbox.remote.add_folder("INBOX");
    mbox.remote
        .add_message("INBOX", &email(1), Flags::from_iter([Flag::Seen]))
        .unwrap();
    mbox.remote
        .add_message("INBOX", &email(2), Flags::default())
        .unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(report.statistics().added_locally, 2);

    let ids = mbox.local_ids("/Imported/INBOX");
    assert_eq!(ids.len(), 2);
    let first = mbox.local.get_message(ids[0]).unwrap();
    assert_eq!(first.flags, FlagBits::SEEN);
    assert_eq!(first.raw, email(1));

    let tracker = mbox
        .cache
        .get_folder_by_remote_path("INBOX")
        .unwrap()
        .unwrap();
    assert_eq!(tracker.uid_validity, uid_validity);
    assert!(tracker.last_sync.is_some());
    assert_eq!(mbox.cache.messages(tracker.folder_id).unwrap().len(), 2);
}

#[test]
fn test_full_sync_of_converged_mailbox_changes_nothing() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    for n in 1..=3 {
        mbox.remote
            .add_message("INBOX", &email(n), Flags::from_iter([Flag::Seen]))
            .unwrap();
    }
    mbox.sync(false);
    mbox.remote.clear_commands();

    let report = mbox.sync(true);
    assert!(report.is_ok());
    assert!(report.statistics().is_unchanged());
    assert_eq!(report.statistics().matched, 3);
    assert_eq!(mbox.remote.count_commands("UID STORE"), 0);
    assert_eq!(mbox.remote.count_commands("APPEND"), 0);

    // an incremental pass over an unchanged folder compares nothing
    let report = mbox.sync(false);
    assert!(report.statistics().is_unchanged());
    assert_eq!(report.statistics().matched, 0);
    assert_eq!(mbox.remote.count_commands("UID FETCH 1:3 (UID FLAGS)"), 1);
}

#[test]
fn test_flag_changes_are_merged_both_ways() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    let uid = mbox
        .remote
        .add_message("INBOX", &email(1), Flags::from_iter([Flag::Seen]))
        .unwrap();
    mbox.sync(false);

    let id = mbox.local_ids("/Imported/INBOX")[0];
    mbox.local
        .set_flags(id, FlagBits::SEEN | FlagBits::FLAGGED)
        .unwrap();
    mbox.remote
        .set_message_flags("INBOX", uid, Flags::default())
        .unwrap();

    let report = mbox.sync(true);
    assert_eq!(report.statistics().updated, 1);
    assert_eq!(mbox.local.message_flags(id), Some(FlagBits::FLAGGED));
    assert_eq!(
        mbox.remote.message_flags("INBOX", uid),
        Some(Flags::from_iter([Flag::Flagged]))
    );

    let report = mbox.sync(true);
    assert!(report.statistics().is_unchanged());
}

#[test]
fn test_new_local_message_is_appended() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote
        .add_message("INBOX", &email(1), Flags::default())
        .unwrap();
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/INBOX");
    let id = mbox
        .local
        .add_message(folder_id, &email(2), FlagBits::SEEN | FlagBits::DRAFT)
        .unwrap();

    let report = mbox.sync(false);
    assert_eq!(report.statistics().added_remotely, 1);
    assert_eq!(mbox.remote.count_commands("APPEND INBOX"), 1);

    let uids = mbox.remote.message_uids("INBOX");
    assert_eq!(uids, vec![1, 2]);
    assert_eq!(mbox.remote.message_body("INBOX", 2), Some(email(2)));
    assert_eq!(
        mbox.remote.message_flags("INBOX", 2),
        Some(Flags::from_iter([Flag::Seen, Flag::Draft]))
    );

    let tracked = mbox.cache.messages(folder_id).unwrap();
    assert_eq!(tracked.get_by_item(id).map(|msg| msg.uid), Some(2));

    // the appended message must not come back as a new remote one
    let report = mbox.sync(false);
    assert!(report.statistics().is_unchanged());
    assert_eq!(mbox.local_ids("/Imported/INBOX").len(), 2);
}

#[test]
fn test_new_remote_message_is_fetched_incrementally() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote
        .add_message("INBOX", &email(1), Flags::default())
        .unwrap();
    mbox.sync(false);
    mbox.remote.clear_commands();

    mbox.remote
        .add_message("INBOX", &email(2), Flags::default())
        .unwrap();
    let report = mbox.sync(false);

    assert_eq!(report.statistics().added_locally, 1);
    assert_eq!(
        mbox.remote
            .count_commands("UID FETCH 2:* (UID FLAGS INTERNALDATE BODY.PEEK[])"),
        1
    );
    assert_eq!(mbox.local_ids("/Imported/INBOX").len(), 2);
}

#[test]
fn test_unannounced_uid_next_still_fetches_new_messages() {
    let mbox = Mailbox::new(MemoryRemote::new().without_uid_next());
    mbox.remote.add_folder("INBOX");
    mbox.remote
        .add_message("INBOX", &email(1), Flags::default())
        .unwrap();
    mbox.sync(false);

    mbox.remote
        .add_message("INBOX", &email(2), Flags::default())
        .unwrap();
    let report = mbox.sync(false);

    assert_eq!(report.statistics().added_locally, 1);

    // the open range returns the last message, which is already
    // tracked
    let report = mbox.sync(false);
    assert_eq!(report.statistics().added_locally, 0);
    assert_eq!(mbox.local_ids("/Imported/INBOX").len(), 2);
}

#[test]
fn test_remote_deletion_deletes_local_message() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    for n in 1..=2 {
        mbox.remote
            .add_message("INBOX", &email(n), Flags::default())
            .unwrap();
    }
    mbox.sync(false);
    mbox.remote.remove_message("INBOX", 1).unwrap();

    let report = mbox.sync(true);
    assert_eq!(report.statistics().deleted_locally, 1);

    let ids = mbox.local_ids("/Imported/INBOX");
    assert_eq!(ids.len(), 1);
    assert_eq!(mbox.local.get_message(ids[0]).unwrap().raw, email(2));

    let folder_id = mbox.local_folder_id("/Imported/INBOX");
    assert_eq!(mbox.cache.messages(folder_id).unwrap().len(), 1);
}

#[test]
fn test_local_deletions_are_expunged_in_batches() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    for n in 1..=33 {
        mbox.remote
            .add_message("INBOX", &email(n), Flags::default())
            .unwrap();
    }
    mbox.sync(false);

    for id in mbox.local_ids("/Imported/INBOX") {
        mbox.local.delete_item(id).unwrap();
    }
    mbox.remote.clear_commands();

    let report = mbox.sync(false);
    assert_eq!(report.statistics().deleted_remotely, 33);

    let expunges: Vec<String> = mbox
        .remote
        .commands()
        .into_iter()
        .filter(|cmd| cmd.starts_with("UID EXPUNGE"))
        .collect();
    assert_eq!(
        expunges,
        vec!["UID EXPUNGE 1:16", "UID EXPUNGE 17:32", "UID EXPUNGE 33"]
    );
    assert_eq!(mbox.remote.count_commands("UID STORE"), 3);
    assert_eq!(mbox.remote.count_commands("EXPUNGE"), 0);
    assert!(mbox.remote.message_uids("INBOX").is_empty());

    let folder_id = mbox.local_folder_id("/Imported/INBOX");
    assert!(mbox.cache.messages(folder_id).unwrap().is_empty());
}

#[test]
fn test_deletions_without_uidplus_expunge_once() {
    let mbox = Mailbox::new(MemoryRemote::new().with_uid_plus(false));
    mbox.remote.add_folder("INBOX");
    for n in 1..=3 {
        mbox.remote
            .add_message("INBOX", &email(n), Flags::default())
            .unwrap();
    }
    mbox.sync(false);

    let ids = mbox.local_ids("/Imported/INBOX");
    mbox.local.delete_item(ids[0]).unwrap();
    mbox.local.delete_item(ids[2]).unwrap();
    mbox.remote.clear_commands();

    let report = mbox.sync(false);
    assert_eq!(report.statistics().deleted_remotely, 2);
    assert_eq!(mbox.remote.count_commands("UID EXPUNGE"), 0);
    assert_eq!(mbox.remote.count_commands("EXPUNGE"), 1);
    assert_eq!(mbox.remote.message_uids("INBOX"), vec![2]);
}

#[test]
fn test_uid_validity_change_resynchronizes_folder() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote.set_uid_validity("INBOX", 5).unwrap();
    for n in 1..=2 {
        mbox.remote
            .add_message("INBOX", &email(n), Flags::default())
            .unwrap();
    }
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/INBOX");
    mbox.local
        .add_message(folder_id, &email(3), FlagBits::SEEN)
        .unwrap();
    mbox.remote.set_uid_validity("INBOX", 7).unwrap();
    mbox.remote.clear_commands();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(report.statistics().added_remotely, 1);
    assert_eq!(mbox.remote.count_commands("APPEND INBOX"), 1);
    assert_eq!(mbox.remote.message_body("INBOX", 3), Some(email(3)));

    assert!(mbox.local_ids("/Imported/INBOX").is_empty());
    assert!(mbox.cache.messages(folder_id).unwrap().is_empty());
    let tracker = mbox.cache.get_folder(folder_id).unwrap().unwrap();
    assert_eq!(tracker.uid_validity, 7);

    let report = mbox.sync(false);
    assert_eq!(report.statistics().added_locally, 3);
    assert_eq!(mbox.local_ids("/Imported/INBOX").len(), 3);
}

#[test]
fn test_unparsable_remote_message_is_skipped() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote
        .add_message("INBOX", b" \r\n\r\n", Flags::default())
        .unwrap();
    mbox.remote
        .add_message("INBOX", &email(2), Flags::default())
        .unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(report.statistics().added_locally, 1);

    let ids = mbox.local_ids("/Imported/INBOX");
    assert_eq!(ids.len(), 1);
    assert_eq!(mbox.local.get_message(ids[0]).unwrap().raw, email(2));
}

#[test]
fn test_local_folder_rename_renames_remote_folder() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("Work");
    mbox.remote
        .add_message("Work", &email(1), Flags::default())
        .unwrap();
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/Work");
    mbox.local
        .rename_folder(folder_id, "/Imported/Archive")
        .unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(mbox.remote.count_commands("RENAME Work Archive"), 1);
    assert!(mbox.remote.has_folder("Archive"));
    assert!(!mbox.remote.has_folder("Work"));

    let tracker = mbox.cache.get_folder(folder_id).unwrap().unwrap();
    assert_eq!(tracker.local_path, "/Imported/Archive");
    assert_eq!(tracker.remote_path, "Archive");

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert!(report.statistics().is_unchanged());
}

#[test]
fn test_folder_moved_out_of_scope_is_abandoned() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("Work");
    mbox.remote
        .add_message("Work", &email(1), Flags::default())
        .unwrap();
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/Work");
    mbox.local.rename_folder(folder_id, "/Notes").unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert!(mbox.remote.has_folder("Work"));
    assert!(mbox.cache.get_folder(folder_id).unwrap().is_none());

    // the remote folder is mirrored again under the local root
    let new_id = mbox.local_folder_id("/Imported/Work");
    assert_ne!(new_id, folder_id);
    assert_eq!(mbox.local_ids("/Imported/Work").len(), 1);
    assert_eq!(mbox.local_ids("/Notes").len(), 1);
}

#[test]
fn test_local_folder_deletion_deletes_remote_folder() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote.add_folder("Work");
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/Work");
    mbox.local.delete_folder(folder_id).unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert!(!mbox.remote.has_folder("Work"));
    assert!(mbox.remote.has_folder("INBOX"));
    assert!(mbox.cache.get_folder(folder_id).unwrap().is_none());
}

#[test]
fn test_remote_folder_deletion_deletes_local_folder() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote.add_folder("Work");
    mbox.remote
        .add_message("Work", &email(1), Flags::default())
        .unwrap();
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/Work");
    RemoteFolderClient::delete(&mbox.remote, "Work").unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert!(mbox.local.get_folder(folder_id).is_err());
    assert!(mbox.cache.get_folder(folder_id).unwrap().is_none());
    assert!(!mbox.remote.has_folder("Work"));
}

#[test]
fn test_new_local_folder_is_created_remotely() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");

    let projects = mbox.local.create_folder("/Imported/Projects").unwrap();
    mbox.local
        .add_message(projects.id, &email(1), FlagBits::SEEN)
        .unwrap();
    let notes = mbox.local.create_folder("/Notes").unwrap();
    mbox.local
        .add_message(notes.id, &email(2), FlagBits::EMPTY)
        .unwrap();

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(report.statistics().added_remotely, 1);
    assert_eq!(mbox.remote.folder_names(), vec!["INBOX", "Projects"]);
    assert_eq!(mbox.remote.message_uids("Projects"), vec![1]);

    let tracker = mbox.cache.get_folder(projects.id).unwrap().unwrap();
    assert_eq!(tracker.remote_path, "Projects");
    assert_eq!(
        tracker.uid_validity,
        mbox.remote.uid_validity("Projects").unwrap()
    );

    let report = mbox.sync(false);
    assert!(report.statistics().is_unchanged());
    assert_eq!(mbox.remote.count_commands("CREATE"), 1);
}

#[test]
fn test_unselectable_remote_folder_is_paired_only() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_unselectable_folder("Shared");

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert!(mbox.local.get_folder_by_path("/Imported/Shared").is_ok());
    assert_eq!(mbox.remote.count_commands("SELECT"), 0);
}

#[test]
fn test_failing_folder_does_not_stop_the_others() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("Broken");
    mbox.remote.add_folder("INBOX");
    mbox.remote
        .add_message("INBOX", &email(1), Flags::default())
        .unwrap();
    mbox.remote.reject_select("Broken");

    let report = mbox.sync(false);
    assert!(!report.is_ok());
    assert_eq!(report.statistics().added_locally, 1);

    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "Broken");
    assert_eq!(errors[0].1.kind(), ErrorKind::ProtocolFailure);

    // the local folder of the failing remote folder must survive
    let report = mbox.sync(false);
    assert_eq!(report.errors().count(), 1);
    assert!(mbox.remote.has_folder("Broken"));
    assert!(mbox.local.get_folder_by_path("/Imported/Broken").is_ok());
}

#[test]
fn test_failed_push_during_uid_validity_change_keeps_local_messages() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    mbox.remote.set_uid_validity("INBOX", 5).unwrap();
    for n in 1..=2 {
        mbox.remote
            .add_message("INBOX", &email(n), Flags::default())
            .unwrap();
    }
    mbox.sync(false);

    let folder_id = mbox.local_folder_id("/Imported/INBOX");
    mbox.local
        .add_message(folder_id, &email(3), FlagBits::SEEN)
        .unwrap();
    mbox.remote.set_uid_validity("INBOX", 7).unwrap();
    mbox.remote.reject_append("INBOX");

    let report = mbox.sync(false);
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "INBOX");
    assert_eq!(errors[0].1.kind(), ErrorKind::ProtocolFailure);

    // nothing was discarded, and the old epoch is kept
    assert_eq!(mbox.local_ids("/Imported/INBOX").len(), 3);
    assert_eq!(mbox.cache.messages(folder_id).unwrap().len(), 2);
    let tracker = mbox.cache.get_folder(folder_id).unwrap().unwrap();
    assert_eq!(tracker.uid_validity, 5);

    mbox.remote.accept_all();
    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(report.statistics().added_remotely, 1);
    assert!(mbox.local_ids("/Imported/INBOX").is_empty());
    let tracker = mbox.cache.get_folder(folder_id).unwrap().unwrap();
    assert_eq!(tracker.uid_validity, 7);
}

#[test]
fn test_remote_folder_created_concurrently_is_paired() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");

    let projects = mbox.local.create_folder("/Imported/Projects").unwrap();
    mbox.local
        .add_message(projects.id, &email(1), FlagBits::SEEN)
        .unwrap();
    mbox.remote.create_concurrently("Projects");

    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert_eq!(mbox.remote.count_commands("CREATE Projects"), 1);
    assert_eq!(mbox.remote.message_uids("Projects"), vec![1]);

    let tracker = mbox.cache.get_folder(projects.id).unwrap().unwrap();
    assert_eq!(tracker.remote_path, "Projects");
}

#[test]
fn test_rejected_remote_folder_creation_is_reported() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");

    let projects = mbox.local.create_folder("/Imported/Projects").unwrap();
    mbox.remote.reject_create("Projects");

    let report = mbox.sync(false);
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "/Imported/Projects");
    assert!(!mbox.remote.has_folder("Projects"));
    assert!(mbox.cache.get_folder(projects.id).unwrap().is_none());

    // the local folder is kept and retried on the next pass
    mbox.remote.accept_all();
    let report = mbox.sync(false);
    assert!(report.is_ok());
    assert!(mbox.remote.has_folder("Projects"));
    assert!(mbox.local.get_folder(projects.id).is_ok());
}

#[test]
fn test_flags_of_untracked_remote_message_are_ignored() {
    let mbox = Mailbox::new(MemoryRemote::new());
    mbox.remote.add_folder("INBOX");
    let skipped = mbox
        .remote
        .add_message("INBOX", b" \r\n\r\n", Flags::default())
        .unwrap();
    mbox.remote
        .add_message("INBOX", &email(2), Flags::default())
        .unwrap();
    mbox.sync(false);

    mbox.remote
        .set_message_flags("INBOX", skipped, Flags::from_iter([Flag::Flagged]))
        .unwrap();
    mbox.remote.clear_commands();

    let report = mbox.sync(true);
    assert!(report.is_ok());
    assert_eq!(mbox.remote.count_commands("UID FETCH 1:2 (UID FLAGS)"), 1);
    assert_eq!(report.statistics().matched, 1);
    assert_eq!(report.statistics().updated, 0);
    assert_eq!(report.statistics().deleted_remotely, 0);
    assert_eq!(mbox.remote.count_commands("UID STORE"), 0);
    assert_eq!(mbox.remote.message_uids("INBOX"), vec![1, 2]);
    assert_eq!(mbox.local_ids("/Imported/INBOX").len(), 1);
}
