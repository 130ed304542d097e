//! Shared panel configuration
//!
//! Single writer, many readers. Every edit recompiles the `PanelProgram` and
//! publishes it on a watch channel; the scheduler picks up the latest one at
//! the start of its next tick and never observes a half-applied edit.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::color::ColorExpr;
use crate::config::{ConfigError, PanelConfig};
use crate::layout::{LayoutMode, LedGroupIndex};
use crate::program::PanelProgram;

pub struct PanelStore {
    config: Mutex<PanelConfig>,
    program: watch::Sender<Arc<PanelProgram>>,
}

impl PanelStore {
    pub fn new(config: PanelConfig) -> Self {
        let program = Arc::new(PanelProgram::compile(&config));
        let (tx, _) = watch::channel(program);
        Self {
            config: Mutex::new(config),
            program: tx,
        }
    }

    /// Receiver for the scheduler
    pub fn subscribe(&self) -> watch::Receiver<Arc<PanelProgram>> {
        self.program.subscribe()
    }

    pub fn program(&self) -> Arc<PanelProgram> {
        self.program.borrow().clone()
    }

    pub fn config(&self) -> PanelConfig {
        self.config.lock().clone()
    }

    pub fn replace(&self, config: PanelConfig) {
        self.modify(|current| *current = config);
    }

    /// Apply an edit to a copy; commit and publish only if it succeeds
    pub fn update<F>(&self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PanelConfig) -> Result<(), ConfigError>,
    {
        let mut config = self.config.lock();
        let mut draft = config.clone();
        edit(&mut draft)?;
        self.commit(&mut config, draft);
        Ok(())
    }

    /// Set one slot of the active color array
    pub fn set_led_color(&self, slot: usize, expr: &str) -> Result<(), ConfigError> {
        let expr = ColorExpr::parse(expr)?;
        self.update(|config| {
            let count = LedGroupIndex::for_mode(config.layout_mode).led_count();
            if slot >= count {
                return Err(ConfigError::SlotOutOfRange { slot, count });
            }
            write_slots(config, &[slot], &expr);
            Ok(())
        })
    }

    /// Set every slot of a named group (or `all`)
    pub fn set_group_color(&self, group: &str, expr: &str) -> Result<(), ConfigError> {
        let expr = ColorExpr::parse(expr)?;
        self.update(|config| {
            let slots = LedGroupIndex::for_mode(config.layout_mode)
                .slots(group)
                .ok_or_else(|| ConfigError::UnknownGroup(group.to_string()))?;
            write_slots(config, &slots, &expr);
            Ok(())
        })
    }

    pub fn set_layout_mode(&self, mode: LayoutMode) {
        self.modify(|config| config.layout_mode = mode);
        info!("Layout switched to {:?}", mode);
    }

    pub fn reset_defaults(&self) {
        self.replace(PanelConfig::default());
        info!("Configuration reset to defaults");
    }

    /// Persist the current configuration
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let config = self.config();
        config.save(path).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Edits that cannot fail
    fn modify(&self, edit: impl FnOnce(&mut PanelConfig)) {
        let mut config = self.config.lock();
        let mut draft = config.clone();
        edit(&mut draft);
        self.commit(&mut config, draft);
    }

    /// Caller holds the config lock, so publication order matches edit order
    fn commit(&self, current: &mut PanelConfig, draft: PanelConfig) {
        let program = Arc::new(PanelProgram::compile(&draft));
        *current = draft;
        self.program.send_replace(program);
        debug!("Panel program republished");
    }
}

/// Writes into the active array, growing it to the layout size first
fn write_slots(config: &mut PanelConfig, slots: &[usize], expr: &ColorExpr) {
    let count = LedGroupIndex::for_mode(config.layout_mode).led_count();
    let key = config.active_color_key();
    let colors = &mut config.colors_mut(key).colors;
    if colors.len() < count {
        colors.resize(count, crate::color::FALLBACK_COLOR.to_string());
    }
    let text = expr.to_string();
    for &slot in slots {
        colors[slot] = text.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::config::ColorKey;

    fn store() -> PanelStore {
        PanelStore::new(PanelConfig::default())
    }

    #[test]
    fn test_edit_publishes_new_program() {
        let store = store();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.set_led_color(3, "ff0000").unwrap();

        assert!(rx.has_changed().unwrap());
        let program = rx.borrow_and_update().clone();
        assert_eq!(program.expressions()[3], ColorExpr::Solid(Rgb::new(0xFF, 0, 0)));
        assert_eq!(store.config().metrics.colors[3], "FF0000");
    }

    #[test]
    fn test_set_group_color() {
        let store = store();
        store.set_group_color("gpu_led", "FF0000-0000FF-gpu_temp").unwrap();

        let program = store.program();
        assert!(program.needs_metrics());
        let slots = LedGroupIndex::for_mode(LayoutMode::Big).slots("gpu_led").unwrap();
        for slot in slots {
            assert!(program.expressions()[slot].is_metric_keyed());
        }
    }

    #[test]
    fn test_all_group_covers_layout() {
        let store = store();
        store.set_group_color("all", "random").unwrap();
        assert!(store.program().expressions().iter().all(|e| *e == ColorExpr::Random));
    }

    #[test]
    fn test_rejected_edits_leave_state_untouched() {
        let store = store();
        let before = store.config();
        let mut rx = store.subscribe();

        assert!(matches!(
            store.set_group_color("no_such_group", "FF0000"),
            Err(ConfigError::UnknownGroup(_))
        ));
        assert!(matches!(
            store.set_led_color(84, "FF0000"),
            Err(ConfigError::SlotOutOfRange { slot: 84, count: 84 })
        ));
        assert!(matches!(store.set_led_color(0, "zz-yy"), Err(ConfigError::Color(_))));

        assert_eq!(store.config(), before);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_layout_switch_recompiles() {
        let store = store();
        store.set_layout_mode(LayoutMode::Small);
        assert_eq!(store.program().led_count(), 30);

        store.set_led_color(29, "00FF00").unwrap();
        assert_eq!(store.config().metrics.colors[29], "00FF00");

        store.reset_defaults();
        assert_eq!(store.program().led_count(), 84);
        assert_eq!(store.config(), PanelConfig::default());
    }

    #[test]
    fn test_infallible_edits_publish() {
        let store = store();
        let mut rx = store.subscribe();

        store.set_layout_mode(LayoutMode::Small);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().led_count(), 30);

        store.replace(PanelConfig {
            display_mode: "time".into(),
            ..PanelConfig::default()
        });
        assert!(rx.has_changed().unwrap());
        let program = rx.borrow_and_update().clone();
        assert_eq!(program.led_count(), 84);
        assert_eq!(program.color_key(), ColorKey::Time);
        assert_eq!(store.config().display_mode, "time");
    }

    #[test]
    fn test_time_display_edits_time_colors() {
        let store = PanelStore::new(PanelConfig {
            display_mode: "time".into(),
            ..PanelConfig::default()
        });
        assert_eq!(store.program().color_key(), ColorKey::Time);

        store.set_led_color(0, "123456").unwrap();
        let config = store.config();
        assert_eq!(config.time.colors[0], "123456");
        assert_eq!(config.metrics.colors[0], "FFFFFF");
    }

    #[tokio::test]
    async fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = store();
        store.set_led_color(0, "00FF00").unwrap();

        store.save(&path).await.unwrap();

        let loaded = PanelConfig::try_load(&path).await.unwrap();
        assert_eq!(loaded, store.config());
    }
}
