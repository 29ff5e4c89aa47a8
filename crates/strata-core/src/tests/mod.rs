mod helpers;

mod restore_session;
