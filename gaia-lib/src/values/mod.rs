pub mod error;
pub mod objid;
pub mod value;

pub use error::Failure;
pub use objid::{
    commands_object, config_object, root_object, user_object, ObjId, COMMANDS_OBJECT,
    CONFIG_OBJECT, ROOT_OBJECT, USER_OBJECT,
};
pub use value::{
    escape_str, format_num, v_bool, v_int, v_list, v_map, v_null, v_num, v_obj, v_str, v_string,
    Value,
};
