//! Cross-device selection lists.
//!
//! Each device owns named lists of selectable values. The owning device
//! mutates its lists locally, forwards cursor changes to the screen as
//! `select.changed` events, and publishes the whole list map through its
//! custom state so other devices can read it. This is best-effort state
//! publication: the last full publication wins and no ordering or conflict
//! resolution is attempted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    console::ConsoleService,
    dto::DeviceId,
    error::ServiceError,
};

/// A device moved its cursor; params carry `{key, index}`.
pub const EVENT_SELECT_CHANGED: &str = "select.changed";

/// Custom-state property under which the list map is published.
const SELECTIONS_STATE_KEY: &str = "selections";

/// Whether a list allows one or many selected entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectMode {
    /// Exactly one entry is selected; the cursor is the selection.
    Single,
    /// Any subset of entries may be selected; the cursor only navigates.
    Multi,
}

/// One named list of selectable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectList {
    /// The selectable values, in display order.
    pub items: Vec<Value>,
    /// Single- or multi-select behavior.
    pub mode: SelectMode,
    /// Indices currently selected.
    pub selected: Vec<usize>,
    /// Navigation cursor.
    pub cursor: usize,
}

/// Selection-list service for the local device.
pub struct SelectService {
    console: Arc<ConsoleService>,
    lists: Mutex<IndexMap<String, SelectList>>,
    remote_cursors: Mutex<HashMap<DeviceId, HashMap<String, usize>>>,
}

impl SelectService {
    /// Create the service with no lists defined.
    pub fn new(console: Arc<ConsoleService>) -> Arc<Self> {
        Arc::new(Self {
            console,
            lists: Mutex::new(IndexMap::new()),
            remote_cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Record cursor changes other devices forward to us.
    pub fn attach(self: &Arc<Self>) -> Result<(), ServiceError> {
        let service: Weak<Self> = Arc::downgrade(self);
        self.console.on(EVENT_SELECT_CHANGED, move |sender, params| {
            let Some(service) = service.upgrade() else {
                return;
            };
            let (Some(key), Some(index)) = (
                params.get("key").and_then(Value::as_str),
                params.get("index").and_then(Value::as_u64),
            ) else {
                warn!(%sender, "select.changed without key/index");
                return;
            };
            service
                .remote_cursors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .entry(sender)
                .or_default()
                .insert(key.to_string(), index as usize);
        })?;
        Ok(())
    }

    /// Define (or replace) a named list, selecting the first entry.
    pub fn define_list(
        &self,
        key: &str,
        items: Vec<Value>,
        mode: SelectMode,
    ) -> Result<(), ServiceError> {
        if key.is_empty() {
            return Err(ServiceError::InvalidInput("list key must not be empty".into()));
        }
        let selected = match mode {
            SelectMode::Single if !items.is_empty() => vec![0],
            _ => Vec::new(),
        };
        self.lock_lists().insert(
            key.to_string(),
            SelectList {
                items,
                mode,
                selected,
                cursor: 0,
            },
        );
        self.publish()
    }

    /// The items of a named list.
    pub fn items(&self, key: &str) -> Option<Vec<Value>> {
        self.lock_lists().get(key).map(|list| list.items.clone())
    }

    /// Move the cursor of a named list to `index`.
    ///
    /// In single-select mode the cursor is also the selection. Controllers
    /// forward the change to the screen; the full list map is republished
    /// either way.
    pub fn set_index(&self, key: &str, index: usize) -> Result<(), ServiceError> {
        {
            let mut lists = self.lock_lists();
            let list = lists
                .get_mut(key)
                .ok_or_else(|| ServiceError::NotFound(format!("no list `{key}`")))?;
            if index >= list.items.len() {
                return Err(ServiceError::InvalidInput(format!(
                    "index {index} out of bounds for list `{key}` of {} items",
                    list.items.len()
                )));
            }
            list.cursor = index;
            if list.mode == SelectMode::Single {
                list.selected = vec![index];
            }
        }

        if !self.console.is_screen() {
            self.console.send_event(
                DeviceId::SCREEN,
                EVENT_SELECT_CHANGED,
                json!({ "key": key, "index": index }),
            )?;
        }
        self.publish()
    }

    /// Advance the cursor, wrapping past the end.
    pub fn select_next(&self, key: &str) -> Result<(), ServiceError> {
        let (cursor, len) = self.cursor_and_len(key)?;
        if len == 0 {
            return Ok(());
        }
        self.set_index(key, (cursor + 1) % len)
    }

    /// Move the cursor back, wrapping past the start.
    pub fn select_prev(&self, key: &str) -> Result<(), ServiceError> {
        let (cursor, len) = self.cursor_and_len(key)?;
        if len == 0 {
            return Ok(());
        }
        self.set_index(key, (cursor + len - 1) % len)
    }

    /// Toggle membership of `index` in a multi-select list.
    ///
    /// Returns whether the entry is selected afterwards.
    pub fn toggle(&self, key: &str, index: usize) -> Result<bool, ServiceError> {
        let now_selected = {
            let mut lists = self.lock_lists();
            let list = lists
                .get_mut(key)
                .ok_or_else(|| ServiceError::NotFound(format!("no list `{key}`")))?;
            if list.mode != SelectMode::Multi {
                return Err(ServiceError::InvalidState(format!(
                    "list `{key}` is single-select"
                )));
            }
            if index >= list.items.len() {
                return Err(ServiceError::InvalidInput(format!(
                    "index {index} out of bounds for list `{key}` of {} items",
                    list.items.len()
                )));
            }
            if let Some(position) = list.selected.iter().position(|&i| i == index) {
                list.selected.remove(position);
                false
            } else {
                list.selected.push(index);
                true
            }
        };
        self.publish()?;
        Ok(now_selected)
    }

    /// Cursor position of a named list; 0 when the list is unknown.
    pub fn selected_index(&self, key: &str) -> usize {
        self.lock_lists().get(key).map(|list| list.cursor).unwrap_or(0)
    }

    /// The item under the cursor, if the list exists and is non-empty.
    pub fn selected_item(&self, key: &str) -> Option<Value> {
        let lists = self.lock_lists();
        let list = lists.get(key)?;
        list.items.get(list.cursor).cloned()
    }

    /// Whether `index` is selected in a named list.
    pub fn is_selected(&self, key: &str, index: usize) -> bool {
        self.lock_lists()
            .get(key)
            .map(|list| list.selected.contains(&index))
            .unwrap_or(false)
    }

    /// Last cursor another device forwarded for a named list.
    pub fn device_cursor(&self, device_id: DeviceId, key: &str) -> Option<usize> {
        self.remote_cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&device_id)
            .and_then(|cursors| cursors.get(key))
            .copied()
    }

    /// Read the list map another device last published, if any.
    pub fn published_lists(&self, device_id: DeviceId) -> Option<Value> {
        self.console
            .custom_data(Some(device_id), Some(SELECTIONS_STATE_KEY))
    }

    fn cursor_and_len(&self, key: &str) -> Result<(usize, usize), ServiceError> {
        let lists = self.lock_lists();
        let list = lists
            .get(key)
            .ok_or_else(|| ServiceError::NotFound(format!("no list `{key}`")))?;
        Ok((list.cursor, list.items.len()))
    }

    /// Publish the entire list map through this device's custom state.
    fn publish(&self) -> Result<(), ServiceError> {
        let lists = self.lock_lists();
        let value = serde_json::to_value(&*lists)?;
        drop(lists);
        self.console.set_custom_property(SELECTIONS_STATE_KEY, value)
    }

    fn lock_lists(&self) -> MutexGuard<'_, IndexMap<String, SelectList>> {
        self.lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
