//! Ensures a static boolean property with a fixed value exists on a type.
//!
//! When the property already has a getter with a body, the getter is made to return the value.
//! Otherwise the missing pieces are added: a private static backing field, a getter returning
//! the value, a setter storing into the field and the property itself. The type is created
//! (and marked synthetic) if the module does not declare it.

use tracing::debug;

use sigpatch_core::builder::{BodyBuilder, MethodBuilder};
use sigpatch_core::module::{FieldDecl, PropertyDecl, Visibility};
use sigpatch_core::{FieldRef, MethodId, Module, Opcode, Operand, TypeDecl, TypeSig};

use crate::constant_return::{Constant, ConstantReturn};
use crate::{Error, Patch, PatchState, Result, Staged};

/// Defines `type_name.property` as a static `bool` that always reads `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefineFlag {
    /// Full type name, `Namespace.Name`; the namespace is everything before the last dot.
    pub type_name: String,
    pub property: String,
    pub value: bool,
}

impl DefineFlag {
    pub fn new(type_name: impl Into<String>, property: impl Into<String>, value: bool) -> Self {
        Self {
            type_name: type_name.into(),
            property: property.into(),
            value,
        }
    }

    fn split_name(&self) -> (&str, &str) {
        self.type_name
            .rsplit_once('.')
            .unwrap_or(("", self.type_name.as_str()))
    }

    fn getter_name(&self) -> String {
        format!("get_{}", self.property)
    }

    fn setter_name(&self) -> String {
        format!("set_{}", self.property)
    }

    fn field_name(&self) -> String {
        let mut chars = self.property.chars();
        match chars.next() {
            Some(first) => format!("_{}{}", first.to_lowercase(), chars.as_str()),
            None => "_flag".to_string(),
        }
    }

    fn constant(&self) -> ConstantReturn {
        ConstantReturn::new(Constant::Bool(self.value))
    }

    /// Computes the change for `module`; `None` when the flag already reads `value`.
    pub fn plan(&self, module: &Module) -> Result<Option<Staged>> {
        let (namespace, name) = self.split_name();
        if name.is_empty() || self.property.is_empty() {
            return Err(Error::Precondition(format!(
                "cannot define {}.{}",
                self.type_name, self.property
            )));
        }
        let index = module.find_type(namespace, name);

        // An existing getter with a body only needs its result pinned.
        if let Some(ty) = index
            && let Some(getter) = module.types[ty]
                .property(&self.property)
                .and_then(|p| p.getter.as_deref())
            && let Some(method) = module.types[ty].method_index(getter)
            && module.types[ty].methods[method].has_body()
        {
            let id = MethodId::new(ty, method);
            let decl = &module.types[ty].methods[method];
            if !decl.is_bool_accessor() {
                return Err(Error::Precondition(format!(
                    "getter {} of {} is not a static bool accessor",
                    decl.name, self.property
                )));
            }
            return Ok(match self.constant().plan(decl)? {
                PatchState::AlreadyApplied => None,
                PatchState::Pending(body) => {
                    debug!("{}: pinned getter to {}", module.describe(id), self.value);
                    Some(Staged::Body { method: id, body })
                }
            });
        }

        let mut decl = match index {
            Some(i) => module.types[i].clone(),
            None => TypeDecl {
                synthetic: true,
                ..TypeDecl::new(namespace, name)
            },
        };
        self.complete(&mut decl)?;
        debug!(
            "{}: defined {} ({})",
            decl.full_name(),
            self.property,
            if index.is_some() { "existing type" } else { "new type" }
        );
        Ok(Some(Staged::Type { index, decl }))
    }

    /// Adds whatever is missing of field, accessors and property to `decl`.
    fn complete(&self, decl: &mut TypeDecl) -> Result<()> {
        let field = self.field_name();
        let usable = decl
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.field_type == TypeSig::Boolean && f.is_static);
        match usable {
            Some(false) => {
                return Err(Error::Precondition(format!(
                    "field {field} exists and is not a static bool"
                )));
            }
            Some(true) => {}
            None => decl.fields.push(FieldDecl {
                name: field.clone(),
                field_type: TypeSig::Boolean,
                is_static: true,
                visibility: Visibility::Private,
            }),
        }

        let getter = self.getter_name();
        match decl.method_index(&getter) {
            Some(i) if !decl.methods[i].is_bool_accessor() => {
                return Err(Error::Precondition(format!(
                    "{getter} exists and is not a static bool accessor"
                )));
            }
            Some(i) => {
                if let PatchState::Pending(body) = self.constant().plan(&decl.methods[i])? {
                    decl.methods[i].body = Some(body);
                }
            }
            None => {
                let (opcode, operand) = Constant::Bool(self.value).load();
                let body = BodyBuilder::new().op_with(opcode, operand).ret().build()?;
                decl.methods
                    .push(MethodBuilder::new(&getter, TypeSig::Boolean).body(body).build());
            }
        }

        let setter = self.setter_name();
        if decl.method_index(&setter).is_none() {
            let field_ref = FieldRef {
                declaring_type: decl.type_ref(),
                name: field,
                field_type: TypeSig::Boolean,
            };
            let body = BodyBuilder::new()
                .ldarg(0)
                .op_with(Opcode::Stsfld, Operand::Field(field_ref))
                .ret()
                .build()?;
            decl.methods.push(
                MethodBuilder::new(&setter, TypeSig::Void)
                    .param("value", TypeSig::Boolean)
                    .body(body)
                    .build(),
            );
        }

        match decl.properties.iter().position(|p| p.name == self.property) {
            Some(i) if decl.properties[i].property_type != TypeSig::Boolean => {
                return Err(Error::Precondition(format!(
                    "property {} is not a bool",
                    self.property
                )));
            }
            Some(i) => {
                let p = &mut decl.properties[i];
                p.getter.get_or_insert(getter);
                p.setter.get_or_insert(setter);
            }
            None => decl.properties.push(PropertyDecl {
                name: self.property.clone(),
                property_type: TypeSig::Boolean,
                getter: Some(getter),
                setter: Some(setter),
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigpatch_core::builder::{ModuleBuilder, TypeBuilder};
    use sigpatch_core::validator::validate_module;

    fn apply(module: &mut Module, staged: Staged) {
        match staged {
            Staged::Body { method, body } => module.method_mut(method).unwrap().body = Some(body),
            Staged::Type { index: Some(i), decl } => module.types[i] = decl,
            Staged::Type { index: None, decl } => module.types.push(decl),
        }
    }

    #[test]
    fn missing_type_is_created() {
        let mut module = ModuleBuilder::new("Game").build();
        let flag = DefineFlag::new("Game.Licensing.Features", "IsPro", true);
        let staged = flag.plan(&module).unwrap().unwrap();
        let Staged::Type { index: None, decl } = &staged else {
            panic!("expected a new type");
        };
        assert!(decl.synthetic);
        assert_eq!(decl.namespace, "Game.Licensing");
        assert_eq!(decl.name, "Features");
        assert_eq!(decl.fields[0].name, "_isPro");
        let prop = decl.property("IsPro").unwrap();
        assert_eq!(prop.getter.as_deref(), Some("get_IsPro"));
        assert_eq!(prop.setter.as_deref(), Some("set_IsPro"));

        apply(&mut module, staged);
        assert!(validate_module(&module).is_ok());
        assert!(module.unresolved_references().is_empty());
        // The created getter already returns the value.
        assert_eq!(flag.plan(&module).unwrap(), None);
    }

    #[test]
    fn existing_getter_is_pinned() {
        let body = BodyBuilder::new().ldc_i4(0).ret().build().unwrap();
        let ty = TypeBuilder::new("", "QX7RT2MZKA")
            .method(MethodBuilder::new("KOJPNKHPGCL", TypeSig::Boolean).body(body).build())
            .property("IsPro", TypeSig::Boolean, "KOJPNKHPGCL")
            .build();
        let mut module = ModuleBuilder::new("Game").ty(ty).build();

        let flag = DefineFlag::new("QX7RT2MZKA", "IsPro", true);
        let staged = flag.plan(&module).unwrap().unwrap();
        let Staged::Body { method, body } = &staged else {
            panic!("expected a body change");
        };
        assert_eq!(*method, MethodId::new(0, 0));
        assert_eq!(body.instructions[0].operand, Operand::Int32(1));

        apply(&mut module, staged);
        assert_eq!(flag.plan(&module).unwrap(), None);
        assert_eq!(module.types[0].methods.len(), 1);
    }

    #[test]
    fn conflicting_field_is_rejected() {
        let ty = TypeBuilder::new("App", "Features")
            .field("_isPro", TypeSig::Int32, true)
            .build();
        let module = ModuleBuilder::new("Game").ty(ty).build();
        let flag = DefineFlag::new("App.Features", "IsPro", true);
        assert!(matches!(flag.plan(&module), Err(Error::Precondition(_))));
    }

    #[test]
    fn instance_getter_is_rejected() {
        let body = BodyBuilder::new().ldc_i4(0).ret().build().unwrap();
        let getter = MethodBuilder::new("get_IsPro", TypeSig::Boolean)
            .instance()
            .body(body.clone())
            .build();
        let ty = TypeBuilder::new("App", "Features").method(getter).build();
        let module = ModuleBuilder::new("Game").ty(ty).build();
        let flag = DefineFlag::new("App.Features", "IsPro", true);
        assert!(matches!(flag.plan(&module), Err(Error::Precondition(_))));

        // Same through a property naming a getter that takes an argument.
        let getter = MethodBuilder::new("HBIHPPNHFPE", TypeSig::Boolean)
            .param("slot", TypeSig::Int32)
            .body(body)
            .build();
        let ty = TypeBuilder::new("", "QX7RT2MZKA")
            .method(getter)
            .property("IsPro", TypeSig::Boolean, "HBIHPPNHFPE")
            .build();
        let module = ModuleBuilder::new("Game").ty(ty).build();
        let flag = DefineFlag::new("QX7RT2MZKA", "IsPro", true);
        assert!(matches!(flag.plan(&module), Err(Error::Precondition(_))));
    }
}
