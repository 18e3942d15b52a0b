mod net;
mod poll;

pub(crate) use self::net::{
    accept, local_addr, new_socket, peer_addr, set_nonblocking, socket_addr,
    to_socket_addr,
};
pub(crate) use self::poll::{
    is_closed_conn, mask_to_poll, poll, poll_to_mask, readiness_probe,
    HAS_POLLRDHUP,
};
