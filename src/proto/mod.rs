// Generated by build.rs (tonic-build) into this directory.

pub mod common {
    include!("campus.common.rs");
}

pub mod auth {
    include!("campus.auth.rs");
}

pub mod items {
    include!("campus.items.rs");
}

pub mod schedules {
    include!("campus.schedules.rs");
}

pub mod events {
    include!("campus.events.rs");
}

pub mod notifications {
    include!("campus.notifications.rs");
}

pub mod users {
    include!("campus.users.rs");
}

pub mod health {
    include!("grpc.health.v1.rs");
}
