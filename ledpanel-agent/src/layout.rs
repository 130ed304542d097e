//! LED group index per layout mode
//!
//! Maps symbolic group names ("cpu_led", "gpu_temp", ...) to slot indices.
//! Both tables are built once and never change at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Seven-segment digit
const DIGIT_SEGMENTS: usize = 7;
const TEMP_DIGITS: usize = 3;
const USAGE_DIGITS: usize = 2;
/// The leading "1" of 100% on the big layout
const USAGE_ONE_SEGMENTS: usize = 2;

pub const BIG_LED_COUNT: usize = 84;
pub const SMALL_LED_COUNT: usize = 30;

/// Synthetic group covering every slot
pub const ALL_GROUP: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Big,
    Small,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSlots {
    Single(usize),
    Many(Vec<usize>),
}

impl GroupSlots {
    pub fn to_vec(&self) -> Vec<usize> {
        match self {
            GroupSlots::Single(slot) => vec![*slot],
            GroupSlots::Many(slots) => slots.clone(),
        }
    }
}

#[derive(Debug)]
pub struct LedGroupIndex {
    mode: LayoutMode,
    led_count: usize,
    groups: BTreeMap<String, GroupSlots>,
}

impl LedGroupIndex {
    pub fn for_mode(mode: LayoutMode) -> &'static LedGroupIndex {
        static BIG: OnceLock<LedGroupIndex> = OnceLock::new();
        static SMALL: OnceLock<LedGroupIndex> = OnceLock::new();
        match mode {
            LayoutMode::Big => BIG.get_or_init(Self::big),
            LayoutMode::Small => SMALL.get_or_init(Self::small),
        }
    }

    fn big() -> Self {
        let mut builder = Builder::default();
        for device in ["cpu", "gpu"] {
            builder.many(&format!("{device}_led"), 2);
            builder.many(&format!("{device}_temp"), TEMP_DIGITS * DIGIT_SEGMENTS);
            builder.single(&format!("{device}_celsius"));
            builder.single(&format!("{device}_fahrenheit"));
            builder.many(
                &format!("{device}_usage"),
                USAGE_ONE_SEGMENTS + USAGE_DIGITS * DIGIT_SEGMENTS,
            );
            builder.single(&format!("{device}_percent_led"));
        }
        builder.finish(LayoutMode::Big, BIG_LED_COUNT)
    }

    fn small() -> Self {
        let mut builder = Builder::default();
        builder.many("cpu_led", 2);
        builder.many("gpu_led", 2);
        builder.single("celsius");
        builder.single("fahrenheit");
        builder.single("percent_led");
        builder.many("digit_frame", TEMP_DIGITS * DIGIT_SEGMENTS);
        builder.finish(LayoutMode::Small, SMALL_LED_COUNT)
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn led_count(&self) -> usize {
        self.led_count
    }

    pub fn group(&self, name: &str) -> Option<&GroupSlots> {
        self.groups.get(name)
    }

    /// Group names, `all` excluded
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Every slot of a group, in order
    pub fn slots(&self, name: &str) -> Option<Vec<usize>> {
        if name == ALL_GROUP {
            return Some((0..self.led_count).collect());
        }
        self.group(name).map(GroupSlots::to_vec)
    }

    /// Slot `index` of a group; single-slot groups ignore the index
    pub fn slot(&self, name: &str, index: usize) -> Option<usize> {
        match self.group(name)? {
            GroupSlots::Single(slot) => Some(*slot),
            GroupSlots::Many(slots) => slots.get(index).copied(),
        }
    }
}

#[derive(Default)]
struct Builder {
    next: usize,
    groups: BTreeMap<String, GroupSlots>,
}

impl Builder {
    fn single(&mut self, name: &str) {
        self.groups.insert(name.to_string(), GroupSlots::Single(self.next));
        self.next += 1;
    }

    fn many(&mut self, name: &str, count: usize) {
        let slots = (self.next..self.next + count).collect();
        self.groups.insert(name.to_string(), GroupSlots::Many(slots));
        self.next += count;
    }

    fn finish(self, mode: LayoutMode, led_count: usize) -> LedGroupIndex {
        debug_assert!(self.next <= led_count, "{mode:?} layout overflows its LED count");
        LedGroupIndex {
            mode,
            led_count,
            groups: self.groups,
        }
    }
}
