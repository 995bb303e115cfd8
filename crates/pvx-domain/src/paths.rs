//! Serde helpers for path-valued metadata fields.
//!
//! Paths are written as `{"__type__": "Path", "__Path__": "<path>"}` so that
//! readers can tell them apart from plain strings; plain strings are still
//! accepted on read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const PATH_TYPE: &str = "Path";

#[derive(Serialize)]
struct TaggedPathRef<'a> {
    #[serde(rename = "__type__")]
    kind: &'static str,
    #[serde(rename = "__Path__")]
    path: &'a Path,
}

impl<'a> TaggedPathRef<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            kind: PATH_TYPE,
            path,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathRepr {
    Tagged {
        #[serde(rename = "__type__")]
        kind: String,
        #[serde(rename = "__Path__")]
        path: PathBuf,
    },
    Plain(PathBuf),
}

impl PathRepr {
    fn into_path<E: serde::de::Error>(self) -> Result<PathBuf, E> {
        match self {
            PathRepr::Tagged { kind, path } if kind == PATH_TYPE => Ok(path),
            PathRepr::Tagged { kind, .. } => Err(E::custom(format!(
                "expected a tagged {PATH_TYPE} value, found __type__ {kind:?}"
            ))),
            PathRepr::Plain(path) => Ok(path),
        }
    }
}

pub(crate) mod path_list {
    use super::{Deserialize, Deserializer, PathBuf, PathRepr, Serializer, TaggedPathRef};

    pub(crate) fn serialize<S: Serializer>(
        paths: &[PathBuf],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(paths.iter().map(|path| TaggedPathRef::new(path)))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<PathBuf>, D::Error> {
        Vec::<PathRepr>::deserialize(deserializer)?
            .into_iter()
            .map(PathRepr::into_path)
            .collect()
    }
}

pub(crate) mod path_map {
    use super::{
        BTreeMap, Deserialize, Deserializer, PathBuf, PathRepr, Serializer, TaggedPathRef,
    };

    pub(crate) fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<PathBuf>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(name, paths)| {
            let tagged = paths
                .iter()
                .map(|path| TaggedPathRef::new(path))
                .collect::<Vec<_>>();
            (name, tagged)
        }))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<PathBuf>>, D::Error> {
        let raw = BTreeMap::<String, Vec<PathRepr>>::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (name, paths) in raw {
            let paths = paths
                .into_iter()
                .map(PathRepr::into_path)
                .collect::<Result<Vec<_>, _>>()?;
            map.insert(name, paths);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Holder {
        #[serde(with = "path_list")]
        paths: Vec<PathBuf>,
        #[serde(with = "path_map")]
        by_dep: BTreeMap<String, Vec<PathBuf>>,
    }

    #[test]
    fn paths_are_written_tagged() -> anyhow::Result<()> {
        let holder = Holder {
            paths: vec![PathBuf::from("/venvs/black/bin/black")],
            by_dep: BTreeMap::from([(
                "pyflakes".to_string(),
                vec![PathBuf::from("/venvs/black/bin/pyflakes")],
            )]),
        };
        let value = serde_json::to_value(&holder)?;
        assert_eq!(
            value,
            json!({
                "paths": [{"__type__": "Path", "__Path__": "/venvs/black/bin/black"}],
                "by_dep": {
                    "pyflakes": [{"__type__": "Path", "__Path__": "/venvs/black/bin/pyflakes"}]
                }
            })
        );
        Ok(())
    }

    #[test]
    fn plain_strings_are_accepted_on_read() -> anyhow::Result<()> {
        let holder: Holder = serde_json::from_value(json!({
            "paths": ["/bin/tool"],
            "by_dep": {"dep": ["/bin/dep-tool"]}
        }))?;
        assert_eq!(holder.paths, vec![PathBuf::from("/bin/tool")]);
        assert_eq!(holder.by_dep["dep"], vec![PathBuf::from("/bin/dep-tool")]);
        Ok(())
    }

    #[test]
    fn foreign_tags_are_rejected() {
        let result: Result<Holder, _> = serde_json::from_value(json!({
            "paths": [{"__type__": "Url", "__Path__": "/x"}],
            "by_dep": {}
        }));
        assert!(result.is_err(), "non-path tags must not decode as paths");
    }
}
