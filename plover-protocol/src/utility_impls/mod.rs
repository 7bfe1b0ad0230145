mod actor_id;
mod change_hash;
mod element_id;
mod key;
mod object_id;
mod opid;
mod scalar_value;
