pub mod add_to_site;
pub mod apply;
pub mod check;
pub mod mark;
pub mod refresh;
pub mod site;
pub mod status;
pub mod update;
pub mod upload;
