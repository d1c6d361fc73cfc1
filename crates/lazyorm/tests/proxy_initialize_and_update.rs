//! Lazy reference initialization, inline dirty tracking and merge.

use lazyorm::prelude::*;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
struct Animal {
    name: String,
    age: i32,
    sex: Option<String>,
    color: Option<String>,
}

impl Model for Animal {
    const TABLE_NAME: &'static str = "animal";
    const PRIMARY_KEY: &'static [&'static str] = &["name"];
    type Id = String;

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: OnceLock<Vec<FieldInfo>> = OnceLock::new();
        FIELDS.get_or_init(|| {
            vec![
                FieldInfo::of::<String>("name").primary_key(true),
                FieldInfo::of::<i32>("age"),
                FieldInfo::of::<Option<String>>("sex"),
                FieldInfo::of::<Option<String>>("color"),
            ]
        })
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", self.name.clone().into()),
            ("age", self.age.into()),
            ("sex", self.sex.clone().into()),
            ("color", self.color.clone().into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.get_named("name")?,
            age: row.get_named("age")?,
            sex: row.get_named("sex")?,
            color: row.get_named("color")?,
        })
    }

    fn primary_key_value(&self) -> Vec<Value> {
        vec![self.name.clone().into()]
    }
}

fn key() -> String {
    "animal".to_string()
}

fn factory(color: Option<&str>) -> SessionFactory {
    let factory = SessionFactory::builder()
        .register::<Animal>()
        .build()
        .unwrap();
    factory
        .in_transaction(|session| {
            session.persist(Animal {
                name: key(),
                age: 3,
                sex: Some("female".into()),
                color: color.map(str::to_string),
            })?;
            Ok(())
        })
        .unwrap();
    factory
}

fn stored(factory: &SessionFactory) -> Animal {
    factory
        .in_session(|session| {
            let animal = session.find::<Animal>(&key())?.expect("animal row");
            assert!(is_initialized(&animal));
            animal.to_value()
        })
        .unwrap()
}

#[test]
fn initialize_with_getter() {
    let factory = factory(Some("green"));
    let loads = factory.statistics().entity_load_count();

    factory
        .in_transaction(|session| {
            let animal = session.get_reference::<Animal>(&key())?;
            assert!(!is_initialized(&animal));
            assert_eq!(factory.statistics().entity_load_count(), loads);

            assert_eq!(animal.with(|a| a.sex.clone())?.as_deref(), Some("female"));
            assert!(is_initialized(&animal));
            assert_eq!(animal.with(|a| a.age)?, 3);
            animal.set("sex", "other")?;
            Ok(())
        })
        .unwrap();

    let animal = stored(&factory);
    assert_eq!(animal.sex.as_deref(), Some("other"));
    assert_eq!(animal.age, 3);
    assert_eq!(animal.color.as_deref(), Some("green"));
}

#[test]
fn initialize_with_setter() {
    let factory = factory(Some("green"));

    factory
        .in_transaction(|session| {
            let animal = session.get_reference::<Animal>(&key())?;
            assert!(!is_initialized(&animal));
            animal.set("sex", "other")?;
            assert!(is_initialized(&animal));
            assert_eq!(session.dirty_fields(&animal), vec!["sex"]);
            Ok(())
        })
        .unwrap();

    let animal = stored(&factory);
    assert_eq!(animal.sex.as_deref(), Some("other"));
    assert_eq!(animal.color.as_deref(), Some("green"));
    assert_eq!(animal.age, 3);
}

#[test]
fn merge_updated_onto_uninitialized() {
    let factory = factory(None);
    let initialized = factory
        .from_transaction(|session| {
            let animal = session.find::<Animal>(&key())?.expect("animal row");
            assert!(is_initialized(&animal));
            assert_eq!(animal.with(|a| a.age)?, 3);
            Ok(animal)
        })
        .unwrap();
    assert_eq!(initialized.status(), EntityStatus::Detached);

    initialized.set("age", 4).unwrap();
    initialized.set("sex", "other").unwrap();

    factory
        .in_transaction(|session| {
            let animal = session.get_reference::<Animal>(&key())?;
            assert!(!is_initialized(&animal));
            let merged = session.merge(&initialized)?;
            assert!(EntityRef::ptr_eq(&merged, &animal));
            assert!(is_initialized(&animal));
            assert_eq!(animal.with(|a| a.age)?, 4);
            assert_eq!(animal.with(|a| a.sex.clone())?.as_deref(), Some("other"));
            Ok(())
        })
        .unwrap();

    let animal = stored(&factory);
    assert_eq!(animal.sex.as_deref(), Some("other"));
    assert_eq!(animal.age, 4);
}

#[test]
fn merge_updated_onto_updated() {
    let factory = factory(None);
    let initialized = factory
        .from_transaction(|session| Ok(session.find::<Animal>(&key())?.expect("animal row")))
        .unwrap();
    initialized.set("age", 4).unwrap();
    initialized.set("sex", "other").unwrap();

    factory
        .in_transaction(|session| {
            let animal = session.find::<Animal>(&key())?.expect("animal row");
            animal.set("age", 5)?;
            animal.set("sex", "male")?;
            session.merge(&initialized)?;
            assert_eq!(animal.with(|a| a.age)?, 4);
            assert_eq!(animal.with(|a| a.sex.clone())?.as_deref(), Some("other"));
            Ok(())
        })
        .unwrap();

    let animal = stored(&factory);
    assert_eq!(animal.sex.as_deref(), Some("other"));
    assert_eq!(animal.age, 4);
}

#[test]
fn merge_uninitialized_onto_uninitialized() {
    let factory = factory(None);
    let uninitialized = factory
        .from_transaction(|session| {
            let animal = session.get_reference::<Animal>(&key())?;
            assert!(!is_initialized(&animal));
            Ok(animal)
        })
        .unwrap();
    assert!(uninitialized.get().unwrap_err().is_lazy_initialization());

    factory
        .in_transaction(|session| {
            let animal = session.get_reference::<Animal>(&key())?;
            assert!(!is_initialized(&animal));
            let merged = session.merge(&uninitialized)?;
            assert!(EntityRef::ptr_eq(&merged, &animal));
            assert!(!is_initialized(&animal));
            Ok(())
        })
        .unwrap();

    let animal = stored(&factory);
    assert_eq!(animal.sex.as_deref(), Some("female"));
    assert_eq!(animal.age, 3);
}

#[test]
fn merge_uninitialized_onto_updated() {
    let factory = factory(None);
    let uninitialized = factory
        .from_transaction(|session| session.get_reference::<Animal>(&key()))
        .unwrap();

    factory
        .in_transaction(|session| {
            let animal = session.find::<Animal>(&key())?.expect("animal row");
            animal.set("sex", "other")?;
            animal.set("age", 4)?;
            session.merge(&uninitialized)?;
            assert!(is_initialized(&animal));
            assert_eq!(animal.with(|a| a.sex.clone())?.as_deref(), Some("other"));
            assert_eq!(animal.with(|a| a.age)?, 4);
            Ok(())
        })
        .unwrap();

    let animal = stored(&factory);
    assert_eq!(animal.sex.as_deref(), Some("other"));
    assert_eq!(animal.age, 4);
}

#[test]
fn reference_to_missing_row_fails_on_access() {
    let factory = factory(None);
    factory
        .in_session(|session| {
            let ghost = session.get_reference::<Animal>(&"ghost".to_string())?;
            let err = ghost.with(|a| a.age).unwrap_err();
            assert_eq!(
                err.session_kind(),
                Some(lazyorm::error::SessionErrorKind::EntityNotFound)
            );
            assert!(session.find::<Animal>(&"ghost".to_string())?.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn truncate_between_scenarios() {
    let factory = factory(Some("green"));
    assert_eq!(factory.schema_manager().count("animal").unwrap(), 1);
    factory.schema_manager().truncate().unwrap();
    assert_eq!(factory.schema_manager().count("animal").unwrap(), 0);
}

#[test]
fn redundant_writes_depend_on_tracking_mode() {
    for (mode, expected_updates) in [(DirtyTracking::Inline, 1), (DirtyTracking::Snapshot, 0)] {
        let factory = SessionFactory::builder()
            .config(OrmConfig::default().with_dirty_tracking(mode))
            .register::<Animal>()
            .build()
            .unwrap();
        factory
            .in_transaction(|session| {
                session.persist(Animal {
                    name: key(),
                    age: 3,
                    sex: Some("female".into()),
                    color: None,
                })?;
                Ok(())
            })
            .unwrap();

        factory
            .in_transaction(|session| {
                let animal = session.get_reference::<Animal>(&key())?;
                animal.set("sex", "female")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            factory.statistics().snapshot().entity_updates,
            expected_updates,
            "{mode} tracking"
        );
    }
}
