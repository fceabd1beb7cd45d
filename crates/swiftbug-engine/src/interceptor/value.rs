//! Model of the arbitrary values a page hands to its console.
//!
//! Objects and arrays are reference types so that pages can build cycles and
//! shared sub-graphs, exactly as script values do. Property reads may run code
//! (accessors), which is how a serializer ends up re-entering the console.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Live host objects the serializer refuses to descend into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    Window,
    Document,
    Console,
    /// A DOM node, carrying its class name (`HTMLDivElement`, `Text`, ...).
    Node(String),
    WeakMap,
    WeakSet,
    Proxy,
    /// Framework internals such as reactive component instances.
    Framework(String),
}

impl HostKind {
    /// `Object.prototype.toString` style tag.
    pub fn tag(&self) -> String {
        match self {
            HostKind::Window => "[object Window]".to_string(),
            HostKind::Document => "[object HTMLDocument]".to_string(),
            HostKind::Console => "[object console]".to_string(),
            HostKind::Node(class) => format!("[object {}]", class),
            HostKind::WeakMap => "[object WeakMap]".to_string(),
            HostKind::WeakSet => "[object WeakSet]".to_string(),
            HostKind::Proxy => "[object Proxy]".to_string(),
            HostKind::Framework(name) => format!("[object {}]", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

pub type Getter = Rc<dyn Fn() -> Result<PageValue, String>>;

#[derive(Clone)]
pub enum Property {
    Value(PageValue),
    /// Accessor; `Err` models a getter that throws.
    Getter(Getter),
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Property::Getter(_) => f.write_str("Getter(..)"),
        }
    }
}

/// Shared handle to an object or array body.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<RefCell<Vec<(String, Property)>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn set(&self, key: impl Into<String>, value: PageValue) {
        let key = key.into();
        let mut props = self.0.borrow_mut();
        match props.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = Property::Value(value),
            None => props.push((key, Property::Value(value))),
        }
    }

    pub fn push(&self, value: PageValue) {
        let mut props = self.0.borrow_mut();
        let index = props.len().to_string();
        props.push((index, Property::Value(value)));
    }

    pub fn define_getter(
        &self,
        key: impl Into<String>,
        getter: impl Fn() -> Result<PageValue, String> + 'static,
    ) {
        self.0
            .borrow_mut()
            .push((key.into(), Property::Getter(Rc::new(getter))));
    }

    /// Snapshot of the own properties. Cloned out so that accessors may touch
    /// the object while it is being walked.
    pub fn entries(&self) -> Vec<(String, Property)> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef@{:x}({} props)", self.id(), self.len())
    }
}

#[derive(Clone, Debug)]
pub enum PageValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Decimal digits without the `n` suffix.
    BigInt(String),
    /// Symbol description.
    Symbol(String),
    /// Function source or name.
    Function(String),
    Error(ErrorValue),
    Array(ObjectRef),
    Object(ObjectRef),
    Host(HostKind),
}

impl PageValue {
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, PageValue)>) -> Self {
        let obj = ObjectRef::new();
        for (k, v) in entries {
            obj.set(k, v);
        }
        PageValue::Object(obj)
    }

    pub fn array(items: impl IntoIterator<Item = PageValue>) -> Self {
        let obj = ObjectRef::new();
        for item in items {
            obj.push(item);
        }
        PageValue::Array(obj)
    }

    pub fn error(name: &str, message: &str, stack: Option<&str>) -> Self {
        PageValue::Error(ErrorValue {
            name: name.to_string(),
            message: message.to_string(),
            stack: stack.map(str::to_string),
        })
    }

    /// `typeof value === 'object'`, which includes `null`.
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            PageValue::Null
                | PageValue::Error(_)
                | PageValue::Array(_)
                | PageValue::Object(_)
                | PageValue::Host(_)
        )
    }
}

impl From<&str> for PageValue {
    fn from(s: &str) -> Self {
        PageValue::String(s.to_string())
    }
}

impl From<String> for PageValue {
    fn from(s: String) -> Self {
        PageValue::String(s)
    }
}

impl From<f64> for PageValue {
    fn from(n: f64) -> Self {
        PageValue::Number(n)
    }
}

impl From<i64> for PageValue {
    fn from(n: i64) -> Self {
        PageValue::Number(n as f64)
    }
}

impl From<bool> for PageValue {
    fn from(b: bool) -> Self {
        PageValue::Bool(b)
    }
}

/// `String(n)` for a script number.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
