use crate::{
    BinaryReader, BinaryWriter, FileFormat, JsonReader, JsonWriter, Result, Value, uuid,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::rc::{Rc, Weak};

/// Kind of SQL endpoint a settings node describes. `Inherit` defers to
/// the parent node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionKind {
    #[default]
    Inherit,
    MySql,
}

impl ConnectionKind {
    pub fn from_value(value: &Value) -> ConnectionKind {
        match value.as_u32() {
            1 => ConnectionKind::MySql,
            _ => ConnectionKind::Inherit,
        }
    }
}

impl From<ConnectionKind> for Value {
    fn from(kind: ConnectionKind) -> Self {
        Value::UInt32(kind as u32)
    }
}

/// Key under which descendants are inlined when a node is persisted.
const CHILDREN_KEY: &str = "children";

/// One node of the connection-settings tree: a local key/value store
/// with parent fallback. Lookups bubble to the parent unless the key is
/// one of the specials (`name` and `parent` never bubble; a missing
/// `uuid` is generated and cached locally). Cloning a handle shares the
/// node; children are owned by their parent, parents are weakly
/// referenced.
#[derive(Clone)]
pub struct ConnectionSettings {
    inner: Rc<RefCell<SettingsNode>>,
}

#[derive(Default)]
struct SettingsNode {
    values: BTreeMap<String, Value>,
    parent: Weak<RefCell<SettingsNode>>,
    children: Vec<Rc<RefCell<SettingsNode>>>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSettings {
    pub fn new() -> ConnectionSettings {
        ConnectionSettings {
            inner: Rc::new(RefCell::new(SettingsNode::default())),
        }
    }

    pub fn with_parent(parent: &ConnectionSettings) -> ConnectionSettings {
        let settings = ConnectionSettings::new();
        settings.set_parent(Some(parent));
        settings
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.borrow().values.contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.borrow_mut().values.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.inner.borrow_mut().values.remove(key);
    }

    /// Local value of `key`, or the nearest ancestor's. `name` and
    /// `parent` never climb; a missing `uuid` is generated on the spot.
    pub fn get(&self, key: &str) -> Value {
        self.lookup(key, true)
    }

    /// Local value only; the tree is not consulted.
    pub fn get_local(&self, key: &str) -> Value {
        self.lookup(key, false)
    }

    fn lookup(&self, key: &str, bubble: bool) -> Value {
        {
            let node = self.inner.borrow();
            if let Some(value) = node.values.get(key) {
                return value.clone();
            }
        }
        if key == "uuid" {
            let uuid = uuid::make_uuid();
            self.inner
                .borrow_mut()
                .values
                .insert("uuid".into(), Value::from(uuid.clone()));
            return Value::from(uuid);
        }
        if bubble && key != "name" && key != "parent" {
            if let Some(parent) = self.parent() {
                return parent.lookup(key, true);
            }
        }
        Value::Null
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        ConnectionKind::from_value(&self.get("type"))
    }

    pub fn parent(&self) -> Option<ConnectionSettings> {
        self.inner
            .borrow()
            .parent
            .upgrade()
            .map(|inner| ConnectionSettings { inner })
    }

    pub fn children(&self) -> Vec<ConnectionSettings> {
        self.inner
            .borrow()
            .children
            .iter()
            .map(|inner| ConnectionSettings {
                inner: inner.clone(),
            })
            .collect()
    }

    /// Re-hangs this node under `parent` (or detaches it), mirroring the
    /// relation in the `parent` key so it survives persistence.
    pub fn set_parent(&self, parent: Option<&ConnectionSettings>) {
        if let Some(previous) = self.parent() {
            previous
                .inner
                .borrow_mut()
                .children
                .retain(|child| !Rc::ptr_eq(child, &self.inner));
        }
        match parent {
            Some(parent) => {
                if Rc::ptr_eq(&parent.inner, &self.inner) {
                    return;
                }
                self.inner.borrow_mut().parent = Rc::downgrade(&parent.inner);
                parent.inner.borrow_mut().children.push(self.inner.clone());
                self.set("parent", parent.get("uuid"));
            }
            None => {
                self.inner.borrow_mut().parent = Weak::new();
                self.remove("parent");
            }
        }
    }

    /// Loads a settings tree, synthesising one default MySQL node named
    /// "Default" when the file is missing, empty or unreadable.
    pub fn load(format: FileFormat, path: impl AsRef<Path>) -> Vec<ConnectionSettings> {
        let loaded = match format {
            FileFormat::Binary => Self::load_binary(path.as_ref()),
            FileFormat::Json => Self::load_json(path.as_ref()),
        };
        let mut list = loaded.unwrap_or_else(|error| {
            log::warn!(
                "Discarding unreadable settings `{}`: {:#}",
                path.as_ref().display(),
                error
            );
            Vec::new()
        });
        if list.is_empty() {
            let settings = ConnectionSettings::new();
            settings.set("name", "Default");
            settings.set("type", ConnectionKind::MySql);
            list.push(settings);
        }
        list
    }

    /// Persists the root-level nodes of `list`, inlining descendants as
    /// `children`. Nodes that have a parent are reached through their
    /// root and skipped at the top level.
    pub fn save(list: &[ConnectionSettings], format: FileFormat, path: impl AsRef<Path>) -> Result<()> {
        let roots = list.iter().filter(|settings| settings.parent().is_none());
        match format {
            FileFormat::Binary => {
                let mut writer = BinaryWriter::create(path)?;
                for settings in roots {
                    writer.write_record(&settings.to_value())?;
                }
                writer.flush()
            }
            FileFormat::Json => {
                let nodes: Vec<Value> = roots.map(ConnectionSettings::to_value).collect();
                let mut writer = JsonWriter::create(path)?;
                writer.write_value(&Value::List(nodes))?;
                writer.flush()
            }
        }
    }

    fn load_binary(path: &Path) -> Result<Vec<ConnectionSettings>> {
        let Ok(file) = File::open(path) else {
            return Ok(Vec::new());
        };
        let mut reader = BinaryReader::new(BufReader::new(file))?;
        let mut list = Vec::new();
        while let Some(value) = reader.read_record()? {
            list.push(Self::from_value(&value));
        }
        Ok(list)
    }

    fn load_json(path: &Path) -> Result<Vec<ConnectionSettings>> {
        let Ok(file) = File::open(path) else {
            return Ok(Vec::new());
        };
        let mut reader = JsonReader::new(BufReader::new(file));
        let Some(value) = reader.read_value()? else {
            return Ok(Vec::new());
        };
        Ok(value
            .as_list()
            .iter()
            .map(Self::from_value)
            .collect())
    }

    /// Map form of this node with descendants inlined under `children`.
    fn to_value(&self) -> Value {
        let mut map = self.inner.borrow().values.clone();
        map.remove(CHILDREN_KEY);
        let children = self.children();
        if !children.is_empty() {
            map.insert(
                CHILDREN_KEY.into(),
                Value::List(children.iter().map(ConnectionSettings::to_value).collect()),
            );
        }
        Value::Map(map)
    }

    /// Rebuilds a node (and, recursively, its subtree) from its map
    /// form.
    fn from_value(value: &Value) -> ConnectionSettings {
        let settings = ConnectionSettings::new();
        let map = value.as_map();
        for (key, item) in &map {
            if key == CHILDREN_KEY {
                continue;
            }
            settings.set(key.clone(), item.clone());
        }
        if let Some(children) = map.get(CHILDREN_KEY) {
            for child in children.as_list() {
                Self::from_value(&child).set_parent(Some(&settings));
            }
        }
        settings
    }
}
