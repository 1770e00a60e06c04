//! Catalog classification enums stored alongside each comic.
//!
//! The database stores every enum as its integer code; unknown codes decode
//! to the `Unknown` variant instead of failing so that rows written by a
//! newer schema remain readable.

use serde::{Deserialize, Serialize};

macro_rules! catalog_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            /// Not classified.
            #[default]
            Unknown,
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Integer code persisted in the database.
            #[must_use]
            pub const fn code(self) -> i32 {
                match self {
                    Self::Unknown => 0,
                    $( Self::$variant => $code, )+
                }
            }

            /// Decodes a persisted code; unrecognised codes map to `Unknown`.
            #[must_use]
            pub const fn from_code(code: i32) -> Self {
                match code {
                    $( $code => Self::$variant, )+
                    _ => Self::Unknown,
                }
            }
        }
    };
}

catalog_enum! {
    /// Publication format.
    ComicType {
        /// Japanese comic.
        Manga = 1,
        /// Chinese comic.
        Manhua = 2,
        /// Korean comic (webtoon).
        Manhwa = 3,
        /// Text novel.
        Novel = 4,
    }
}

catalog_enum! {
    /// Publication status.
    ComicStatus {
        /// Finished.
        Completed = 1,
        /// Releasing new chapters.
        OnAir = 2,
        /// Temporarily paused.
        Break = 3,
        /// Abandoned.
        Dropped = 4,
    }
}

catalog_enum! {
    /// Reader rating, from F (lowest) to SSS (highest).
    Rating {
        /// F rating.
        F = 1,
        /// E rating.
        E = 2,
        /// D rating.
        D = 3,
        /// C rating.
        C = 4,
        /// B rating.
        B = 5,
        /// A rating.
        A = 6,
        /// S rating.
        S = 7,
        /// SS rating.
        Ss = 8,
        /// SSS rating.
        Sss = 9,
    }
}

catalog_enum! {
    /// Scanlation group or site publishing a comic.
    Publisher {
        /// Asura Scans.
        Asura = 1,
        /// Reaper Scans.
        ReaperScans = 2,
        /// Manhua Plus.
        ManhuaPlus = 3,
        /// Flame Scans.
        FlameScans = 4,
        /// Luminous Scans.
        LuminousScans = 5,
        /// Reset Scans.
        ResetScans = 6,
        /// Isekai Scan.
        IsekaiScan = 7,
        /// Realm Scans.
        RealmScans = 8,
        /// Leviatan Scans.
        LeviatanScans = 9,
        /// Night Scans.
        NightScans = 10,
        /// Void Scans.
        VoidScans = 11,
        /// Drake Scans.
        DrakeScans = 12,
        /// Novel Mic.
        NovelMic = 13,
    }
}

catalog_enum! {
    /// Story genre.
    Genre {
        /// Action.
        Action = 1,
        /// Adventure.
        Adventure = 2,
        /// Fantasy.
        Fantasy = 3,
        /// Overpowered protagonist.
        Overpowered = 4,
        /// Comedy.
        Comedy = 5,
        /// Drama.
        Drama = 6,
        /// School life.
        SchoolLife = 7,
        /// Game-like system.
        System = 8,
        /// Supernatural.
        Supernatural = 9,
        /// Martial arts / cultivation.
        MartialArts = 10,
        /// Romance.
        Romance = 11,
        /// Shounen.
        Shounen = 12,
        /// Reincarnation.
        Reincarnation = 13,
    }
}

/// Encodes a set of enum values as their persisted codes.
pub(crate) fn codes<T: Copy>(values: &[T], code: impl Fn(T) -> i32) -> Vec<i32> {
    values.iter().copied().map(code).collect()
}
