use serde::{Deserialize, Serialize};

/// Discriminator carried by [`Value::Tagged`].
///
/// The opaque word of a tagged value means whatever its tag says it means;
/// the VM never interprets it except for [`Tag::NativeCallback`], whose word
/// is an index into a [`HostRegistry`](crate::runtime::host::HostRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Host-native callback, invoked by the `Execute` opcode.
    NativeCallback,

    /// Reference to a code object. Reserved for hosts; the interpreter never
    /// dereferences it.
    Code,

    /// Open for host extension.
    User(u16),
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::NativeCallback => write!(f, "native"),
            Tag::Code => write!(f, "code"),
            Tag::User(n) => write!(f, "user{}", n),
        }
    }
}

/// Runtime value in Scramjet.
///
/// Values are the only data that can live in a slot of the value stack. They
/// are `Copy`; a tagged value's opaque word is owned by whoever produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Value {
    Null,

    /// Contents of a freshly allocated cell or call window that nothing has
    /// written yet. Distinct from `Null`.
    Undefined,

    Boolean(bool),

    Int32(i32),

    Double(f64),

    Tagged(Tag, u64),
}

impl Value {
    pub fn native_callback(id: u32) -> Self {
        Value::Tagged(Tag::NativeCallback, u64::from(id))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_i32(&self) -> bool {
        matches!(self, Value::Int32(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, Value::Double(_))
    }

    pub fn is_native_callback(&self) -> bool {
        matches!(self, Value::Tagged(Tag::NativeCallback, _))
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Value::Tagged(Tag::Code, _))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the opaque word if this value carries exactly `tag`.
    pub fn tagged_word(&self, tag: Tag) -> Option<u64> {
        match self {
            Value::Tagged(t, word) if *t == tag => Some(*word),
            _ => None,
        }
    }

    /// Returns the registry index of a native callback value.
    pub fn as_native_callback(&self) -> Option<u32> {
        self.tagged_word(Tag::NativeCallback)
            .and_then(|word| u32::try_from(word).ok())
    }

    /// Name of the value's kind, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Boolean(_) => "boolean",
            Value::Int32(_) => "int32",
            Value::Double(_) => "double",
            Value::Tagged(Tag::NativeCallback, _) => "native callback",
            Value::Tagged(Tag::Code, _) => "code",
            Value::Tagged(Tag::User(_), _) => "user",
        }
    }
}

// Doubles compare numerically, except that NaN equals NaN so equality stays
// reflexive and `Value` can be `Eq`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Tagged(ta, wa), Value::Tagged(tb, wb)) => ta == tb && wa == wb,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int32(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl std::fmt::Display for Value {
    /// Formats a value using the assembler's literal syntax where one exists.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
            Value::Boolean(true) => write!(f, "T"),
            Value::Boolean(false) => write!(f, "F"),
            Value::Int32(n) => write!(f, "i{}", n),
            Value::Double(d) => write!(f, "d{}", d),
            Value::Tagged(tag, word) => write!(f, "<{}:{:#x}>", tag, word),
        }
    }
}
