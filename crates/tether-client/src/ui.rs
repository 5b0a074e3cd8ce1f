//! # UI Component Registry
//!
//! Host UI code registers elements under a stable `testId` so the coordinator
//! can find them, hit-test a screen point, and drive taps or text input.
//!
//! Bounds are updated independently of registration (layout passes report
//! them later). Hit testing walks components in registration order and returns
//! the first one whose bounds contain the point.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tether_proto::command::FindElement;
use tether_proto::command::SimulateInteraction;

type TapCallback = Arc<dyn Fn() + Send + Sync>;
type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;
type TextAccessor = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Axis-aligned rectangle in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Half-open containment: the left and top edges are inside, the right
    /// and bottom edges are not.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// A UI element as registered by host code.
#[derive(Clone)]
pub struct Component {
    test_id: String,
    kind: String,
    bounds: Option<Rect>,
    on_tap: Option<TapCallback>,
    on_text: Option<TextCallback>,
    text: Option<TextAccessor>,
}

impl Component {
    pub fn new(test_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            kind: kind.into(),
            bounds: None,
            on_tap: None,
            on_text: None,
            text: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn on_tap(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_tap = Some(Arc::new(f));
        self
    }

    pub fn on_text_input(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_text = Some(Arc::new(f));
        self
    }

    /// Live text accessor, read at inspection time.
    pub fn with_text(mut self, f: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
        self.text = Some(Arc::new(f));
        self
    }

    /// Fixed label text.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.with_text(move || Some(label.clone()))
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    fn read_text(&self) -> Option<String> {
        let accessor = self.text.as_ref()?;
        std::panic::catch_unwind(AssertUnwindSafe(|| accessor())).ok().flatten()
    }

    fn info(&self) -> ElementInfo {
        ElementInfo {
            test_id: self.test_id.clone(),
            kind: self.kind.clone(),
            bounds: self.bounds,
            text: self.read_text(),
            pressable: self.on_tap.is_some(),
            editable: self.on_text.is_some(),
        }
    }
}

/// Serializable view of a registered component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub test_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub pressable: bool,
    pub editable: bool,
}

struct Entry {
    component: Component,
    order: u64,
}

#[derive(Default)]
pub struct ComponentRegistry {
    components: DashMap<String, Entry>,
    next_order: AtomicU64,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a component under its `testId`.
    ///
    /// A replaced component moves to the end of the hit-test order.
    pub fn register(&self, component: Component) {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(test_id = %component.test_id, kind = %component.kind, "component registered");
        self.components.insert(component.test_id.clone(), Entry { component, order });
    }

    pub fn unregister(&self, test_id: &str) -> bool {
        self.components.remove(test_id).is_some()
    }

    /// Records a new layout rectangle. Returns false for unknown ids.
    pub fn update_bounds(&self, test_id: &str, bounds: Rect) -> bool {
        match self.components.get_mut(test_id) {
            Some(mut entry) => {
                entry.component.bounds = Some(bounds);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Components in registration order, cloned out of the map.
    fn ordered(&self) -> Vec<Component> {
        let mut entries: Vec<(u64, Component)> = self
            .components
            .iter()
            .map(|e| (e.order, e.component.clone()))
            .collect();
        entries.sort_by_key(|(order, _)| *order);
        entries.into_iter().map(|(_, c)| c).collect()
    }

    fn lookup(&self, test_id: &str) -> Option<Component> {
        self.components.get(test_id).map(|e| e.component.clone())
    }

    /// Every registered component, in registration order.
    pub fn all(&self) -> Vec<ElementInfo> {
        self.ordered().iter().map(Component::info).collect()
    }

    /// Components matching every supplied criterion.
    ///
    /// `testId` and `type` match exactly (type ignores ASCII case); `text`
    /// matches as a substring of the component's current text.
    pub fn find(&self, query: &FindElement) -> Vec<ElementInfo> {
        self.ordered()
            .iter()
            .map(Component::info)
            .filter(|info| query.test_id.as_ref().is_none_or(|id| &info.test_id == id))
            .filter(|info| query.kind.as_ref().is_none_or(|k| info.kind.eq_ignore_ascii_case(k)))
            .filter(|info| {
                query.text.as_ref().is_none_or(|needle| {
                    info.text.as_ref().is_some_and(|text| text.contains(needle.as_str()))
                })
            })
            .collect()
    }

    /// First component, in registration order, whose bounds contain the point.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<ElementInfo> {
        self.ordered()
            .into_iter()
            .find(|c| c.bounds.is_some_and(|b| b.contains(x, y)))
            .map(|c| c.info())
    }

    /// `inspect_element` result: `{found:true, element}` or `{found:false, x, y}`.
    pub fn inspect(&self, x: f64, y: f64) -> Value {
        match self.hit_test(x, y) {
            Some(element) => json!({ "found": true, "element": element }),
            None => json!({ "found": false, "x": x, "y": y }),
        }
    }

    /// Drives a tap or text input.
    ///
    /// Missing elements and missing callbacks are structured failures
    /// (`{success:false, error}`), not errors.
    pub fn interact(&self, request: &SimulateInteraction) -> Value {
        let test_id = request.target.test_id.as_str();
        let verb = request.kind.as_str();
        let Some(component) = self.lookup(test_id) else {
            return failure(format!("Element not found: {test_id}"));
        };

        if request.kind.is_press() {
            let Some(on_tap) = component.on_tap else {
                return failure("Element is not pressable");
            };
            if std::panic::catch_unwind(AssertUnwindSafe(|| on_tap())).is_err() {
                return failure("Tap handler panicked");
            }
            tracing::debug!(test_id, verb, "simulated tap");
            return json!({ "success": true, "action": verb, "testId": test_id });
        }

        let Some(on_text) = component.on_text else {
            return failure("Element does not accept text input");
        };
        let Some(value) = request.value.as_deref() else {
            return failure("Missing value for text input");
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| on_text(value))).is_err() {
            return failure("Text input handler panicked");
        }
        tracing::debug!(test_id, verb, "simulated text input");
        json!({ "success": true, "action": verb, "testId": test_id, "value": value })
    }
}

fn failure(reason: impl Into<String>) -> Value {
    json!({ "success": false, "error": reason.into() })
}
