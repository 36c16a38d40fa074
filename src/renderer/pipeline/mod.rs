pub mod descriptor_set_layout_builder;
pub mod pipeline_state;
pub mod root_signature;
pub mod shader;
pub mod vertex;
