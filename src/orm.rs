#[allow(warnings, clippy::all)]
pub(crate) mod short_url {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "short_urls")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(unique)]
        pub short_code: String,
        #[sea_orm(column_type = "Text")]
        pub original_url: String,
        pub created_at: TimeDateTimeWithTimeZone,
        pub visits: i32,
    }

    impl ActiveModelBehavior for ActiveModel {}
}
