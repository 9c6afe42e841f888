use imap::types::Flag as ImapFlag;

use crate::{Flag, Flags};

pub fn into_imap_flags(flags: &Flags) -> Vec<ImapFlag<'_>> {
    flags
        .iter()
        .map(|flag| match flag {
            Flag::Seen => ImapFlag::Seen,
            Flag::Answered => ImapFlag::Answered,
            Flag::Flagged => ImapFlag::Flagged,
            Flag::Deleted => ImapFlag::Deleted,
            Flag::Draft => ImapFlag::Draft,
            Flag::Recent => ImapFlag::Recent,
            Flag::Custom(flag) => ImapFlag::Custom(flag.into()),
        })
        .collect()
}

pub fn from_imap_flag(imap_flag: &ImapFlag<'_>) -> Flag {
    match imap_flag {
        ImapFlag::Seen => Flag::Seen,
        ImapFlag::Answered => Flag::Answered,
        ImapFlag::Flagged => Flag::Flagged,
        ImapFlag::Deleted => Flag::Deleted,
        ImapFlag::Draft => Flag::Draft,
        ImapFlag::Recent => Flag::Recent,
        ImapFlag::MayCreate => Flag::custom("MayCreate"),
        ImapFlag::Custom(flag) => Flag::custom(flag),
        flag => Flag::custom(flag),
    }
}

pub fn from_imap_flags(imap_flags: &[ImapFlag<'_>]) -> Flags {
    imap_flags.iter().map(from_imap_flag).collect()
}
