use crate::layer::LayerParams;

/// One node of a legacy module tree.
///
/// `th_name` is the serialized class name with its framework prefix
/// stripped (`Sequential`, `SpatialConvolution`, ...). Leaves additionally
/// carry `api_type`, the engine layer type they lower to; containers leave
/// it unset and are dispatched on `th_name` by the importer.
#[derive(Debug, Default)]
pub struct Module {
    pub th_name: String,
    pub api_type: Option<String>,
    pub params: LayerParams,
    pub children: Vec<Module>,
}

impl Module {
    pub fn new(th_name: &str) -> Module {
        Module {
            th_name: th_name.to_string(),
            ..Module::default()
        }
    }

    pub fn with_api_type(th_name: &str, api_type: &str) -> Module {
        Module {
            th_name: th_name.to_string(),
            api_type: Some(api_type.to_string()),
            ..Module::default()
        }
    }

    pub fn add_child(&mut self, child: Module) -> &mut Module {
        self.children.push(child);
        self
    }
}
