mod descriptor;
mod error;
mod registry;

pub use descriptor::{
    ComponentDescriptor, DefaultFn, HasFn, HashFn, ReadFn, RemoveFn, Volatile, WriteFn,
    fingerprint,
};
pub use error::ReflectError;
pub use registry::{ComponentRegistry, ComponentRegistryBuilder};

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::world::World;

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Coin {
        value: i64,
    }

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Mover {
        speed: f32,
        #[serde(skip)]
        travelled: f32,
    }

    impl Volatile for Mover {
        fn keep_volatile(&mut self, previous: &Self) {
            self.travelled = previous.travelled;
        }
    }

    fn registry() -> std::sync::Arc<ComponentRegistry> {
        let mut builder = ComponentRegistry::builder();
        builder
            .register_component::<Coin>("Coin")
            .unwrap()
            .register_volatile_component::<Mover>("Mover")
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut builder = ComponentRegistry::builder();
        builder.register_component::<Coin>("Coin").unwrap();
        let err = builder.register_component::<Mover>("Coin").err().unwrap();
        assert!(matches!(err, ReflectError::DuplicateName(name) if name == "Coin"));
    }

    #[test]
    fn test_unknown_component_names_the_offender() {
        let registry = registry();
        let err = registry.lookup("Bogus").unwrap_err();
        assert!(matches!(err, ReflectError::UnknownComponent(_)));
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn test_write_then_read() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();

        registry.write(&mut world, e, "Coin", json!({"value": 5})).unwrap();
        assert_eq!(world.get::<Coin>(e), Some(&Coin { value: 5 }));
        assert_eq!(registry.read(&world, e, "Coin").unwrap(), json!({"value": 5}));
        assert!(registry.has(&world, e, "Coin").unwrap());
    }

    #[test]
    fn test_write_rejects_bad_shapes() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();

        let not_object = registry.write(&mut world, e, "Coin", json!(5));
        assert!(matches!(not_object, Err(ReflectError::SchemaMismatch { .. })));

        let unknown_field = registry.write(&mut world, e, "Coin", json!({"worth": 5}));
        assert!(matches!(unknown_field, Err(ReflectError::SchemaMismatch { .. })));

        let wrong_type = registry.write(&mut world, e, "Coin", json!({"value": "lots"}));
        assert!(matches!(wrong_type, Err(ReflectError::SchemaMismatch { .. })));

        assert!(!world.has::<Coin>(e));
    }

    #[test]
    fn test_partial_write_keeps_other_fields() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Mover { speed: 2.0, travelled: 7.0 });

        registry.write(&mut world, e, "Mover", json!({})).unwrap();
        assert_eq!(world.get::<Mover>(e).unwrap().speed, 2.0);

        registry.write(&mut world, e, "Mover", json!({"speed": 3.0})).unwrap();
        assert_eq!(world.get::<Mover>(e), Some(&Mover { speed: 3.0, travelled: 7.0 }));
    }

    #[test]
    fn test_volatile_fields_start_from_default_on_attach() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();

        registry.write(&mut world, e, "Mover", json!({"speed": 1.5})).unwrap();
        assert_eq!(world.get::<Mover>(e), Some(&Mover { speed: 1.5, travelled: 0.0 }));
    }

    #[test]
    fn test_change_hash_ignores_skipped_fields() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Mover { speed: 1.0, travelled: 0.0 });
        let before = registry.change_hash(&world, e, "Mover").unwrap();

        world.get_mut::<Mover>(e).unwrap().travelled = 100.0;
        assert_eq!(registry.change_hash(&world, e, "Mover").unwrap(), before);

        world.get_mut::<Mover>(e).unwrap().speed = 3.0;
        assert_ne!(registry.change_hash(&world, e, "Mover").unwrap(), before);
    }

    #[test]
    fn test_snapshot_and_remove() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Coin { value: 1 });

        let snapshot = registry.snapshot(&world, e).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["Coin"], json!({"value": 1}));

        assert!(registry.remove(&mut world, e, "Coin").unwrap());
        assert!(!registry.remove(&mut world, e, "Coin").unwrap());
        assert!(registry.snapshot(&world, e).unwrap().is_empty());
    }

    #[test]
    fn test_read_missing_and_dead() {
        let registry = registry();
        let mut world = World::new();
        let e = world.spawn();

        assert!(matches!(
            registry.read(&world, e, "Coin"),
            Err(ReflectError::MissingComponent { .. })
        ));
        world.despawn(e);
        assert!(matches!(
            registry.read(&world, e, "Coin"),
            Err(ReflectError::NoSuchEntity(_))
        ));
        assert!(matches!(
            registry.write(&mut world, e, "Coin", json!({})),
            Err(ReflectError::NoSuchEntity(_))
        ));
    }

    #[test]
    fn test_names_in_registration_order() {
        let registry = registry();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Coin", "Mover"]);
        assert_eq!(registry.default_document("Coin").unwrap(), json!({"value": 0}));
    }
}
