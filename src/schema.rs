diesel::table! {
    plant_varieties (id) {
        id -> Integer,
        common_name -> Text,
        family -> Nullable<Text>,
        days_to_harvest -> Nullable<Integer>,
    }
}

diesel::table! {
    garden_beds (id) {
        id -> Integer,
        owner_id -> Text,
        name -> Text,
        location -> Nullable<Text>,
        size -> Nullable<Text>,
        description -> Nullable<Text>,
        sun_exposure -> Nullable<Text>,
        irrigation -> Nullable<Text>,
        active -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    plants (id) {
        id -> Integer,
        owner_id -> Text,
        name -> Text,
        variety_id -> Nullable<Integer>,
        bed_id -> Nullable<Integer>,
        from_seed -> Bool,
        seed_source -> Nullable<Text>,
        planted_date -> Nullable<Text>,
        transplanted_date -> Nullable<Text>,
        expected_harvest_date -> Nullable<Text>,
        family -> Nullable<Text>,
        days_to_harvest -> Nullable<Integer>,
        notes -> Nullable<Text>,
        profile_photo_path -> Nullable<Text>,
        archived -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    journals (id) {
        id -> Integer,
        owner_id -> Text,
        plant_id -> Integer,
        text -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    photos (id) {
        id -> Integer,
        owner_id -> Text,
        plant_id -> Integer,
        journal_id -> Nullable<Integer>,
        storage_path -> Text,
        uploaded_at -> Text,
    }
}

diesel::table! {
    tasks (id) {
        id -> Integer,
        owner_id -> Text,
        plant_id -> Nullable<Integer>,
        garden_bed_id -> Nullable<Integer>,
        title -> Text,
        notes -> Nullable<Text>,
        due_date -> Text,
        completed -> Bool,
        recurring_rule -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(plants -> plant_varieties (variety_id));
diesel::joinable!(plants -> garden_beds (bed_id));
diesel::joinable!(journals -> plants (plant_id));
diesel::joinable!(photos -> plants (plant_id));
diesel::joinable!(photos -> journals (journal_id));
diesel::joinable!(tasks -> plants (plant_id));
diesel::joinable!(tasks -> garden_beds (garden_bed_id));

diesel::allow_tables_to_appear_in_same_query!(
    plant_varieties,
    garden_beds,
    plants,
    journals,
    photos,
    tasks,
);
